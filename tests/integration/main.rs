//! Integration tests: drive the public API end to end.

mod feed_replay;
mod simulation;
