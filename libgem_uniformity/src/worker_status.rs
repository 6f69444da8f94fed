/// The stage a worker is reporting progress for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Filling,
    Fitting,
    Writing,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, stage: Stage) -> Self {
        Self {
            progress,
            run_number,
            stage,
        }
    }
}
