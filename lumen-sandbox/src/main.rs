#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

mod app;

use lumen_core::cli::EngineArgs;
use lumen_core::log;

use crate::app::Sandbox;

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = EngineArgs::parse_args();
    log::initialize(args.log_level.into())?;

    let mut sandbox = Sandbox::new(&args)?;
    for frame in 0..args.frames {
        profiling::scope!("frame");
        sandbox.render(frame);
        profiling::finish_frame!();
    }
    sandbox.report();

    Ok(())
}
