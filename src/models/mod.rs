pub mod academic_task;
pub mod calendar_event;
pub mod course;
pub mod obligation;
pub mod profile;
pub mod session_event;
pub mod student;

pub use academic_task::{AcademicTask, StudySession, TaskStatus, TaskType};
pub use calendar_event::{CalendarEvent, EventKind, EventStatus};
pub use course::{Course, MeetingTime, StudentCourse};
pub use obligation::{FixedObligation, FlexibleConstraints, FlexibleObligation, Recurrence};
pub use profile::{PeakWindow, ProductivityProfile};
pub use session_event::{ContextSignal, SessionEvent};
pub use student::{PreferredStudyTime, Student, StudentPreferences};
