use log::info;

mod cli;
mod deadline;
mod driver;
mod error;
mod process;
mod report;
mod runner;
mod stats;
mod tournament;

fn main() -> std::io::Result<()> {
    if let Ok(logger) = flexi_logger::Logger::try_with_env() {
        logger.start().ok();
    }

    let Some(cli_options) = cli::parse() else {
        return Ok(());
    };
    info!("{:#?}", &cli_options);

    let r = runner::Runner::new(cli_options.concurrency, cli_options.report_interval);
    let outcomes = r.run(cli_options.jobs());

    let tally = stats::Tally::fold(&outcomes);
    let [a, b] = &cli_options.competitors;
    print!("{}", report::render(&tally, [a.as_path(), b.as_path()]));

    Ok(())
}
