pub mod client;
pub mod types;

pub use client::{HttpNetwork, Network};
pub use types::{
  Credentials, Method, Request, RequestKey, RequestMode, Response, ResponseSource, ResponseType,
  SERVED_FROM_HEADER,
};
