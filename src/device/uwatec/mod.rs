pub mod aladin;
pub mod memomouse;
pub mod smart;
