mod cli;

fn main() {
    let matches = cli::app().get_matches();

    std::process::exit(match cli::run(&matches) {
        Ok(report) => {
            if report.warning_count > 0 {
                eprintln!("completed with {} warning(s)", report.warning_count);
            }
            0
        }
        Err(err) => {
            eprintln!("ERROR: {}", err);
            err.exit_code()
        }
    });
}
