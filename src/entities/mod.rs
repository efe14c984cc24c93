pub mod goal;
pub mod progress_entry;
