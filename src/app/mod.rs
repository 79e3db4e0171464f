pub(crate) mod output;
pub(crate) mod progress;
pub(crate) mod runtime;
pub(crate) mod terminal;
