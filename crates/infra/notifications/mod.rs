pub mod push_http;
