pub mod authorizor;
mod club;
mod user;

pub use club::Club;
pub use user::User;
