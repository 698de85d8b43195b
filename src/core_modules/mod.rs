// The synchronous building blocks of the sorter, ordered from raw pixels to
// servo commands. None of these modules does I/O or spawns tasks.

pub mod hsv_pixel;
pub mod color_classifier;
pub mod frame_sampler;
pub mod debounce_window;
pub mod calibration;
pub mod trigger_state;
pub mod actuator;
