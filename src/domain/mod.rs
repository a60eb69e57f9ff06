// Domain layer: core models and ports (interfaces) for signals, articles, and their collaborators.

pub mod model;
pub mod ports;
