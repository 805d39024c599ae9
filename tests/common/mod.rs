#![allow(dead_code)]

pub mod mock_pool;

use http::Request;

pub fn get(uri: &str) -> Request<()> {
    Request::builder().uri(uri).body(()).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
