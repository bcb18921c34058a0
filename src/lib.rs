//! Meldwork - declaration files and reports on top of `meldwork-core`

pub mod declare;
pub mod report;

pub use declare::{Declarations, PatternDecl};
