//! Generation requests and their fingerprints
//!
//! A [`GenerationSpec`] is the immutable input to every engine. Its
//! [`Fingerprint`] is a BLAKE3 hash over every field and keys the result
//! cache, so two requests that differ only in prompt whitespace or Unicode
//! composition share one generation.

use crate::error::JobError;
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

pub const MAX_PROMPT_CHARS: usize = 500;
pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 10;

/// Which engine (or chain of engines) should serve the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePreference {
    /// Hybrid mode: try the configured engine order, accept the first passing result
    #[default]
    Auto,
    Ai,
    Procedural,
    Texture,
}

impl EnginePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnginePreference::Auto => "auto",
            EnginePreference::Ai => "ai",
            EnginePreference::Procedural => "procedural",
            EnginePreference::Texture => "texture",
        }
    }
}

impl FromStr for EnginePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "hybrid" => Ok(EnginePreference::Auto),
            "ai" | "ai_enhanced" => Ok(EnginePreference::Ai),
            "procedural" => Ok(EnginePreference::Procedural),
            "texture" | "texture_generated" => Ok(EnginePreference::Texture),
            other => Err(format!("unknown engine preference '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialStyle {
    #[default]
    Realistic,
    Stylized,
    LowPoly,
    SciFi,
    Fantasy,
    Cartoon,
}

impl MaterialStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialStyle::Realistic => "realistic",
            MaterialStyle::Stylized => "stylized",
            MaterialStyle::LowPoly => "low_poly",
            MaterialStyle::SciFi => "sci_fi",
            MaterialStyle::Fantasy => "fantasy",
            MaterialStyle::Cartoon => "cartoon",
        }
    }
}

impl FromStr for MaterialStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "realistic" => Ok(MaterialStyle::Realistic),
            "stylized" => Ok(MaterialStyle::Stylized),
            "low_poly" => Ok(MaterialStyle::LowPoly),
            "sci_fi" => Ok(MaterialStyle::SciFi),
            "fantasy" => Ok(MaterialStyle::Fantasy),
            "cartoon" => Ok(MaterialStyle::Cartoon),
            other => Err(format!("unknown material style '{}'", other)),
        }
    }
}

/// Opaque reference to an image supplied alongside the prompt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceImage {
    /// Path or URI understood by the engine that consumes it
    pub location: PathBuf,
    /// Content digest, when the caller has one; preferred over the location for fingerprints
    pub digest: Option<String>,
}

impl ReferenceImage {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// Immutable description of one model to generate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub prompt: String,
    #[serde(default)]
    pub reference_image: Option<ReferenceImage>,
    #[serde(default)]
    pub engine_preference: EnginePreference,
    pub complexity: u8,
    pub detail_level: u8,
    #[serde(default)]
    pub material_style: MaterialStyle,
}

impl GenerationSpec {
    /// Build a spec with default levels (complexity 7, detail 8, realistic, auto engine).
    ///
    /// The prompt is trimmed and truncated to [`MAX_PROMPT_CHARS`] characters.
    pub fn new(prompt: impl AsRef<str>) -> Self {
        let prompt: String = prompt
            .as_ref()
            .trim()
            .chars()
            .take(MAX_PROMPT_CHARS)
            .collect();
        Self {
            prompt,
            reference_image: None,
            engine_preference: EnginePreference::Auto,
            complexity: 7,
            detail_level: 8,
            material_style: MaterialStyle::Realistic,
        }
    }

    pub fn with_engine(mut self, preference: EnginePreference) -> Self {
        self.engine_preference = preference;
        self
    }

    /// Set complexity, clamped into `[1, 10]`
    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity.clamp(MIN_LEVEL, MAX_LEVEL);
        self
    }

    /// Set detail level, clamped into `[1, 10]`
    pub fn with_detail_level(mut self, detail_level: u8) -> Self {
        self.detail_level = detail_level.clamp(MIN_LEVEL, MAX_LEVEL);
        self
    }

    pub fn with_material_style(mut self, style: MaterialStyle) -> Self {
        self.material_style = style;
        self
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_image = Some(image);
        self
    }

    /// Basic validation performed at submission
    pub fn validate(&self) -> Result<(), JobError> {
        if self.prompt.trim().is_empty() {
            return Err(JobError::Validation("prompt cannot be empty".to_string()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(JobError::Validation(format!(
                "prompt exceeds {} characters",
                MAX_PROMPT_CHARS
            )));
        }
        for (name, value) in [
            ("complexity", self.complexity),
            ("detail_level", self.detail_level),
        ] {
            if !(MIN_LEVEL..=MAX_LEVEL).contains(&value) {
                return Err(JobError::Validation(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_LEVEL, MAX_LEVEL, value
                )));
            }
        }
        Ok(())
    }

    /// Prompt in the canonical form used for hashing and keyword matching
    pub fn normalized_prompt(&self) -> String {
        self.prompt.trim().nfc().collect::<String>()
    }

    /// Stable hash over all fields
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Hasher::new();

        hasher.update(b"prompt:");
        update_with_len(&mut hasher, self.normalized_prompt().as_bytes());

        hasher.update(b"reference:");
        match &self.reference_image {
            Some(image) => match &image.digest {
                Some(digest) => {
                    hasher.update(b"digest:");
                    update_with_len(&mut hasher, digest.as_bytes());
                }
                None => {
                    hasher.update(b"location:");
                    let location = image.location.to_string_lossy();
                    update_with_len(&mut hasher, location.as_bytes());
                }
            },
            None => {
                hasher.update(b"none");
            }
        }

        hasher.update(b"engine:");
        hasher.update(self.engine_preference.as_str().as_bytes());
        hasher.update(b"complexity:");
        hasher.update(&[self.complexity]);
        hasher.update(b"detail:");
        hasher.update(&[self.detail_level]);
        hasher.update(b"style:");
        hasher.update(self.material_style.as_str().as_bytes());

        Fingerprint(*hasher.finalize().as_bytes())
    }
}

fn update_with_len(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// BLAKE3 digest identifying a [`GenerationSpec`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as an integer, used to seed deterministic variation
    pub fn seed(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
