use swc_drv::run;
use swc_util::ExitCode;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let exit = match std::panic::catch_unwind(|| run(&args)) {
        Ok(exit) => exit,
        Err(_) => ExitCode::PanicBox,
    };
    std::process::exit(exit.code());
}
