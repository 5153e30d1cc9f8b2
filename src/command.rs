pub mod print_completions;
pub mod run;

pub use print_completions::print_completions;
pub use run::run;

const PROGRESS_CHARS: &str = "##-";
