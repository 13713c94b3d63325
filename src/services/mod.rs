pub(crate) mod answers;
pub(crate) mod attempt;
pub(crate) mod backend;
pub(crate) mod countdown;
pub(crate) mod lockdown;
pub(crate) mod proctoring;
pub(crate) mod progress;
pub(crate) mod submission;
pub(crate) mod timer_store;
