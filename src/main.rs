// f4 main program

use f4::config::Config;

fn main() {
    env_logger::init();

    let config: Config = argh::from_env();
    std::process::exit(config.run_forth());
}
