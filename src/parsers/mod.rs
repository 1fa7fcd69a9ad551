pub mod calibration;
pub mod geometry;
pub mod gps;
pub mod lidar;
