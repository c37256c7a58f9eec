pub mod resume;
pub mod run;
pub mod stop;
