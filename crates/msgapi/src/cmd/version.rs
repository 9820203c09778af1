use msgapi_server::{DEVICE_PROTOCOL, USER_PROTOCOL};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("msgapi {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("protocols: {DEVICE_PROTOCOL}, {USER_PROTOCOL}");
    println!(
        "target: {}",
        option_env!("MSGAPI_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);

    Ok(SUCCESS)
}
