mod chain;
mod error;
mod io;
mod logging;
mod options;

pub use chain::*;
pub use error::*;
pub use io::*;
pub use logging::*;
pub use options::*;
