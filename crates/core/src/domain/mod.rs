pub mod feedback;
pub mod pattern;
pub mod prioritization;
pub mod story;
