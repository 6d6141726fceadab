//! Debug visualization sinks.

pub mod rerun;

pub use self::rerun::RerunPoseSink;
