// Domain layer: data model and model ports. No pipeline logic here.

pub mod model;
pub mod ports;
