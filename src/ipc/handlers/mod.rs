pub mod analysis;
pub mod assignments;
pub mod backup;
pub mod core;
pub mod marks;
pub mod reference;
pub mod users;
