use failure::Error;
use smu_tracer::options::CliOpt;
use structopt::StructOpt;

fn main() -> Result<(), Error> {
    let opt = CliOpt::from_args();
    opt.initialize_logging()?;
    opt.run()
}
