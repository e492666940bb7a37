mod dataset;

pub use dataset::*;

mod object;

pub use object::*;

mod snapshot;

pub use snapshot::*;
