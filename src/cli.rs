//! CLI domain: parse, route, output, and presentation only.
//! No scheduling logic; the route table dispatches to the coordinator.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, SpecArgs};
pub use presentation::{
    format_events, format_fingerprint, format_generation_json, format_generation_table,
    GenerationRow,
};
pub use route::RunContext;
