pub mod def;
pub mod executor;
pub mod rule;
pub mod store;
pub mod watcher;

pub use def::{ArgumentTemplate, EnvTemplate, FileTemplate, HookDef, ValueSource};
pub use executor::{execute, extract_inputs, resolve_command, ExecutionOutcome, ExtractedInputs, RequestView};
pub use rule::{MatchOp, MatchSource, TriggerRule};
pub use store::{HookStore, StoreError};
pub use watcher::HookWatcher;
