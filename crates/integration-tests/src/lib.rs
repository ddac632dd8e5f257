//! Integration tests for the odometry stack live in `tests/`.
