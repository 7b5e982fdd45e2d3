pub mod heat_transfer;
pub mod illumination;
pub mod materials;
pub mod recorder;
pub mod simulation;
