//! Integration tests: full passes through the public pipeline API.

mod mock_source;
mod pipeline;
