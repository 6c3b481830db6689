mod schema;
mod session;
mod types;

pub use schema::Database;
pub use session::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use types::DatabaseError;
