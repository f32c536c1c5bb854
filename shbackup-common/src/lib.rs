pub mod backend;
pub mod documents;
pub mod error_body;
pub mod quota;
