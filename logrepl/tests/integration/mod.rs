mod cleanup_test;
mod streaming_test;
