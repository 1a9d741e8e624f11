pub mod connection;
pub mod date;
pub mod request;
pub mod response;

pub use connection::{ActiveAction, ClientSession, ConnState};
pub use request::{DispatchState, HttpRequest, Method, ParseError};
pub use response::{HttpResponse, ResponseBody};
