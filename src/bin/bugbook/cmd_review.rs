use anyhow::{Context, Result};
use std::process::ExitCode;

use crate::args;

use bugbook::datastore::Datastore;
use bugbook::diff::resolve_single_run;
use bugbook::identity::IdentityHash;
use bugbook::lifecycle::ReviewState;

pub fn run(global_args: &args::GlobalArgs, args: &args::ReviewArgs) -> Result<ExitCode> {
    let datastore = Datastore::open(&args.datastore.datastore, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open datastore at {}", args.datastore.datastore.display()))?;

    let run = resolve_single_run(&datastore, &args.run)?;
    let hash = IdentityHash::new(args.hash.clone());
    let review = ReviewState::from_user_action(args.status.to_status(), args.comment.clone());

    datastore
        .set_review_status(run.id, &hash, &review)
        .with_context(|| format!("Failed to record review for {hash} in run `{}`", run.name))?;

    if !global_args.quiet {
        println!("Recorded review status `{}` for {} in run `{}`", review.status, hash, run.name);
    }
    Ok(ExitCode::SUCCESS)
}
