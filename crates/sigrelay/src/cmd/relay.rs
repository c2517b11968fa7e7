use sigrelay_relay::{RelayConfig, RelayServer};

use crate::cmd::RelayArgs;
use crate::exit::{relay_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat, SessionEvent};

pub async fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    let config = RelayConfig::default()
        .with_bind(args.bind)
        .with_max_payload_size(args.max_payload);

    let server = RelayServer::bind(config)
        .await
        .map_err(|err| relay_error("bind failed", err))?
        .with_release_hook(move |code| {
            print_event(&SessionEvent::new("code-released", code), format);
        });
    let addr = server
        .local_addr()
        .map_err(|err| relay_error("listener address unavailable", err))?;
    print_event(
        &SessionEvent::new("relay-listening", "").detail(addr.to_string()),
        format,
    );

    server
        .serve_with_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for ctrl-c, relay stops now");
            }
        })
        .await
        .map_err(|err| relay_error("relay failed", err))?;

    print_event(&SessionEvent::new("relay-stopped", ""), format);
    Ok(SUCCESS)
}
