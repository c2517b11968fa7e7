//! In-process session: relay, one receiver and a few initiators over the
//! memory transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sigrelay_peer::{
    Initiator, InitiatorConfig, InitiatorHandle, JoinedInitiator, Receiver, ReceiverConfig,
    ReceiverEvent, ReceiverHandle, RELIABLE, UNRELIABLE,
};
use sigrelay_relay::{RelayConfig, RelayServer};
use sigrelay_transport::MemoryHub;
use sigrelay_wire::code::{generate, normalize, DEFAULT_CODE_LEN};
use sigrelay_wire::Envelope;
use tokio::sync::oneshot;
use tokio::time;

use crate::cmd::DemoArgs;
use crate::exit::{relay_error, signal_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat, SessionEvent};

pub async fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let code = normalize(&args.code.unwrap_or_else(|| generate(DEFAULT_CODE_LEN)));
    let join = args.join.map(|join| normalize(&join)).unwrap_or_else(|| code.clone());

    let config = RelayConfig::default().with_bind(([127, 0, 0, 1], 0).into());
    let server = RelayServer::bind(config)
        .await
        .map_err(|err| relay_error("bind failed", err))?;
    let addr = server
        .local_addr()
        .map_err(|err| relay_error("listener address unavailable", err))?
        .to_string();
    let registry = server.registry();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let relay = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    print_event(
        &SessionEvent::new("relay-listening", "").detail(addr.clone()),
        format,
    );

    let hub = MemoryHub::new();
    let mut host = Receiver::new(
        ReceiverConfig::new(addr.clone(), code.clone()).with_heartbeat_interval(args.heartbeat),
    )
    .register(Arc::new(hub.clone()))
    .await
    .map_err(|err| signal_error("register failed", err))?;

    let registered = time::timeout(args.timeout, async {
        while registry.lock().find_receiver(&code).is_none() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if registered.is_err() {
        return Err(CliError::new(TIMEOUT, "receiver registration timed out"));
    }
    print_event(&SessionEvent::new("receiver-registered", host.code()), format);

    let mut initiators = Vec::new();
    for index in 0..args.initiators {
        let initiator = connect(&addr, &join, &hub, args.timeout, format).await?;
        initiator
            .sender(RELIABLE)
            .and_then(|sender| sender.send(&Envelope::new("hello", json!({ "initiator": index }))))
            .map_err(|err| signal_error("send failed", err))?;
        initiators.push(initiator);
    }

    let mut joined = Vec::new();
    while joined.len() < initiators.len() {
        match next_event(&mut host, args.timeout).await? {
            ReceiverEvent::InitiatorJoined(guest) => {
                print_event(
                    &SessionEvent::new("initiator-joined", &code).peer(guest.id()),
                    format,
                );
                welcome(&guest, &code, format)?;
                joined.push(guest);
            }
            other => report(&other, &code, format),
        }
    }

    // Let the greetings cross before hanging up.
    time::sleep(Duration::from_millis(200)).await;

    for initiator in &initiators {
        initiator.close();
    }
    let mut departed = 0;
    while departed < joined.len() {
        let event = next_event(&mut host, args.timeout).await?;
        if matches!(event, ReceiverEvent::InitiatorLeft(_)) {
            departed += 1;
        }
        report(&event, &code, format);
    }

    host.shutdown().await;
    let _ = stop_tx.send(());
    match relay.await {
        Ok(result) => result.map_err(|err| relay_error("relay failed", err))?,
        Err(err) => tracing::warn!(error = %err, "relay task ended abnormally"),
    }
    print_event(&SessionEvent::new("relay-stopped", ""), format);

    Ok(SUCCESS)
}

async fn connect(
    addr: &str,
    code: &str,
    hub: &MemoryHub,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<InitiatorHandle> {
    let attempt = Initiator::new(InitiatorConfig::new(addr, code))
        .on_close({
            let code = code.to_string();
            move |reason| {
                print_event(
                    &SessionEvent::new("initiator-closed", &code).detail(reason),
                    format,
                );
            }
        })
        .connect(hub);

    let initiator = time::timeout(timeout, attempt)
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("joining {code} timed out")))?
        .map_err(|err| signal_error("join failed", err))?;

    let id = initiator.id().unwrap_or_default().to_string();
    let on_data_code = code.to_string();
    initiator.set_on_data(move |channel, envelope| {
        print_event(
            &SessionEvent::new("initiator-received", &on_data_code)
                .peer(&id)
                .channel(channel)
                .detail(envelope.event),
            format,
        );
    });
    Ok(initiator)
}

fn welcome(guest: &JoinedInitiator, code: &str, format: OutputFormat) -> CliResult<()> {
    let id = guest.id().to_string();
    let on_data_code = code.to_string();
    guest.set_on_data(move |channel, envelope| {
        print_event(
            &SessionEvent::new("receiver-received", &on_data_code)
                .peer(&id)
                .channel(channel)
                .detail(envelope.event),
            format,
        );
    });
    guest
        .sender(UNRELIABLE)
        .and_then(|sender| sender.send(&Envelope::new("welcome", json!({ "code": code }))))
        .map_err(|err| signal_error("send failed", err))
}

async fn next_event(host: &mut ReceiverHandle, timeout: Duration) -> CliResult<ReceiverEvent> {
    match time::timeout(timeout, host.next_event()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(CliError::new(FAILURE, "receiver stopped unexpectedly")),
        Err(_) => Err(CliError::new(TIMEOUT, "timed out waiting for the receiver")),
    }
}

fn report(event: &ReceiverEvent, code: &str, format: OutputFormat) {
    let line = match event {
        ReceiverEvent::InitiatorJoined(guest) => {
            SessionEvent::new("initiator-joined", code).peer(guest.id())
        }
        ReceiverEvent::InitiatorLeft(id) => SessionEvent::new("initiator-left", code).peer(id),
        ReceiverEvent::JoinFailed { id, reason } => SessionEvent::new("join-failed", code)
            .peer(id)
            .detail(reason.clone()),
        ReceiverEvent::RelayClosed => SessionEvent::new("relay-closed", code),
    };
    print_event(&line, format);
}
