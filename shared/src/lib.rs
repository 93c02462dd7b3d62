pub mod battles;
pub mod boards;
pub mod players;
pub mod region;

pub use battles::*;
pub use boards::*;
pub use players::*;
pub use region::Region;
