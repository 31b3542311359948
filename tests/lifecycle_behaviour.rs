//! Behavioural scenarios for the remote build lifecycle.

mod lifecycle;
