//! Input dispatch: three blocking reader threads (keyboard, mouse,
//! window-control) feeding a shared ring buffer that wakes the main event
//! loop through a self-pipe.

pub mod frame;
pub mod reader;
pub mod ring;

pub use frame::{KeyboardTranslator, MouseFrame, WindowBounds, parse_mouse_frame, parse_wctl_frame};
pub use reader::{run_keyboard_reader, run_mouse_reader, run_wctl_poller};
pub use ring::{InputRing, RING_CAPACITY};
