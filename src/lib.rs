pub mod cache;
pub mod config;
pub mod exception;
pub mod param;
pub mod pool;
pub mod request;
pub mod resolver;
pub mod response;
pub mod server;
pub mod util;
pub mod validator;

pub use cache::DirectoryCache;
pub use config::Config;
pub use exception::Exception;
pub use param::HttpStatus;
pub use request::Request;
pub use resolver::{Resolver, Resource, ResourceKind};
pub use response::Response;
pub use server::{Context, Server};
pub use util::HtmlBuilder;
