//! Property-based tests for determinism guarantees

use forge_scheduler::engine::ProceduralEngine;
use forge_scheduler::geometry::GeometryRef;
use forge_scheduler::request::{GenerationSpec, MaterialStyle};
use proptest::prelude::*;

fn style_strategy() -> impl Strategy<Value = MaterialStyle> {
    prop_oneof![
        Just(MaterialStyle::Realistic),
        Just(MaterialStyle::Stylized),
        Just(MaterialStyle::LowPoly),
        Just(MaterialStyle::SciFi),
        Just(MaterialStyle::Fantasy),
        Just(MaterialStyle::Cartoon),
    ]
}

fn spec_strategy() -> impl Strategy<Value = GenerationSpec> {
    (
        "[a-z]{1,12}( [a-z]{1,12}){0,4}",
        1u8..=10,
        1u8..=10,
        style_strategy(),
    )
        .prop_map(|(prompt, complexity, detail, style)| {
            GenerationSpec::new(prompt)
                .with_complexity(complexity)
                .with_detail_level(detail)
                .with_material_style(style)
        })
}

proptest! {
    /// Same request, same fingerprint; surrounding whitespace is ignored
    #[test]
    fn test_fingerprint_determinism(spec in spec_strategy(), pad in 0usize..4) {
        let padded = GenerationSpec {
            prompt: format!("{}{}{}", " ".repeat(pad), spec.prompt, "\t".repeat(pad)),
            ..spec.clone()
        };
        prop_assert_eq!(spec.fingerprint(), spec.clone().fingerprint());
        prop_assert_eq!(spec.fingerprint(), padded.fingerprint());
    }

    /// Changing any level changes the fingerprint
    #[test]
    fn test_fingerprint_covers_levels(spec in spec_strategy()) {
        let bumped = spec.clone().with_detail_level(if spec.detail_level == 10 { 1 } else { spec.detail_level + 1 });
        prop_assert_ne!(spec.fingerprint(), bumped.fingerprint());
    }

    /// Procedural synthesis is a pure function of the request
    #[test]
    fn test_procedural_mesh_determinism(spec in spec_strategy()) {
        let (category_a, mesh_a) = ProceduralEngine::synthesize(&spec);
        let (category_b, mesh_b) = ProceduralEngine::synthesize(&spec);
        prop_assert_eq!(category_a, category_b);
        prop_assert_eq!(&mesh_a, &mesh_b);

        let ref_a = GeometryRef::encode(&mesh_a).unwrap();
        let ref_b = GeometryRef::encode(&mesh_b).unwrap();
        prop_assert_eq!(&ref_a.digest, &ref_b.digest);
        prop_assert_eq!(ref_a.decode().unwrap(), mesh_a.clone());

        prop_assert!(!mesh_a.faces.is_empty());
        prop_assert!(mesh_a.has_finite_vertices());
        prop_assert!(mesh_a.faces_in_range());
    }
}
