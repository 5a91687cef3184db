//! Befehle und ihre Ausfuehrung

pub mod dispatcher;
pub mod types;

pub use dispatcher::Dispatcher;
pub use types::{Anfrage, Antwort, Ausgang, Befehl, SteuerAktion};
