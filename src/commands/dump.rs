//! Dump command implementation.
//!
//! Initializes the selected enumerations once, runs `updates` update
//! passes and prints every instance.

use herakles_pal::{Config, PalContext};
use tracing::debug;

use crate::cli::Resource;
use crate::state::Enumerations;

pub fn command_dump(
    resource: Option<Resource>,
    properties: bool,
    updates: usize,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = PalContext::new(config.clone());
    let set = Enumerations::build(&ctx, resource)?;

    let failures = set.init_all();
    if failures > 0 {
        eprintln!("⚠️  {} enumeration(s) failed to initialize", failures);
    }
    for pass in 0..updates {
        debug!("Update pass {}", pass + 1);
        set.refresh();
    }

    print!("{}", set.render(properties));
    set.clean_up_all();
    Ok(())
}
