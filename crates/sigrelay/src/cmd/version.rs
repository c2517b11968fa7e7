use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("sigrelay {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: sigrelay");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("SIGRELAY_BUILD_TARGET"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", env!("SIGRELAY_GIT_HASH"));
    println!(
        "features: relay={}, peer={}, cli=true",
        cfg!(feature = "relay"),
        cfg!(feature = "peer")
    );
    println!(
        "max_payload_default: {}",
        sigrelay_wire::DEFAULT_MAX_PAYLOAD
    );

    Ok(SUCCESS)
}
