pub mod mock_part_fetcher;

pub use mock_part_fetcher::MockPartFetcher;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
