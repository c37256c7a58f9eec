use std::path::Path;

use anyhow::Result;

use crate::commands::run::{launch, Mode};
use crate::RunArgs;

pub async fn run(cwd: &Path, args: RunArgs) -> Result<i32> {
    launch(cwd, args, Mode::Resume).await
}
