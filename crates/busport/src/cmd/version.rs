use busport_transport::TransportKind;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("busport {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let transports: Vec<&str> = TransportKind::ALL.iter().map(|kind| kind.as_str()).collect();
    println!("name: busport");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("BUSPORT_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("transports: {}", transports.join(", "));

    Ok(SUCCESS)
}
