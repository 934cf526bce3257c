pub mod completions_cmd;
pub mod config_cmd;
pub mod doctor;
pub mod onboard;
pub mod run;
pub mod status;
