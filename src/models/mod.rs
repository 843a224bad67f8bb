mod binding;
mod event;
mod license;
mod product;
mod provisioning;
mod user;
mod validation;

pub use binding::*;
pub use event::*;
pub use license::*;
pub use product::*;
pub use provisioning::*;
pub use user::*;
pub use validation::*;
