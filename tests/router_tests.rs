//! Request routing: matching, replies, error reports

mod common;

use ccs_audio_firmware::core::protocol::{OpCode, PowerMode, ProviderId, Request};
use ccs_audio_firmware::core::transport::{CharacteristicIndex, TransportError};
use ccs_audio_firmware::cs::{CsError, CustomService};
use ccs_audio_firmware::providers::{ProviderError, Reply};
use common::*;

fn start(mask: u8) -> Request {
    Request::new(mask, OpCode::START_RELEASE)
}

#[test]
fn test_unknown_provider_reports_on_control_point() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log);

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut dmic).unwrap();

    let result = service.process_request(start(ProviderId::RCF.bits()));
    assert_eq!(result, Err(CsError::UnknownProvider { mask: 0x10 }));

    let sink = service.transport().sink();
    assert_eq!(sink.frames_on(CharacteristicIndex::Scp), vec![b"16/e/UNK_PROV".to_vec()]);
    assert_eq!(sink.frames.len(), 1);
    assert!(log.borrow().is_empty(), "no handler may run");
}

#[test]
fn test_unknown_provider_without_peer_still_reported() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log);

    let mut server = connected_server();
    server.on_disconnect(1, None).unwrap();
    let mut service: CustomService<'_, _, _> = CustomService::new(server, ManualClock::default());
    service.register_provider(&mut dmic).unwrap();

    // The report cannot go out; the routing error still reaches the caller
    let result = service.process_request(start(ProviderId::LCA.bits()));
    assert_eq!(result, Err(CsError::UnknownProvider { mask: 0x02 }));
    assert!(service.transport().sink().frames.is_empty());
    assert!(service.transport().value(CharacteristicIndex::Scp).is_empty());
}

#[test]
fn test_provider_failure_without_peer_still_reported() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log).replying(Err(ProviderError::Failed));

    let mut server = connected_server();
    server.on_disconnect(1, None).unwrap();
    let mut service: CustomService<'_, _, _> = CustomService::new(server, ManualClock::default());
    service.register_provider(&mut dmic).unwrap();

    assert_eq!(
        service.process_request(start(0x01)),
        Err(CsError::ProviderFailed {
            provider: ProviderId::DMIC,
            error: ProviderError::Failed
        })
    );
    assert!(service.transport().sink().frames.is_empty());
}

#[test]
fn test_empty_mask_is_unknown_provider() {
    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    assert_eq!(
        service.process_request(Request::from_byte(0)),
        Err(CsError::UnknownProvider { mask: 0 })
    );
    assert_eq!(
        service.transport().sink().frames_on(CharacteristicIndex::Scp),
        vec![b"0/e/UNK_PROV".to_vec()]
    );
}

#[test]
fn test_immediate_reply_sends_full_packet() {
    let log = call_log();
    let mut lca = ScriptedProvider::new(ProviderId::LCA, &log);
    lca.response = vec![0x0102, 0x0304];

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut lca).unwrap();

    service.process_request(Request::new(ProviderId::LCA.bits(), OpCode::STOP)).unwrap();

    let frames = service.transport().sink().frames_on(CharacteristicIndex::Lca);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 20);
    assert_eq!(&words(&frames[0])[..3], &[0x0102, 0x0304, 0]);
}

#[test]
fn test_deferred_reply_sends_nothing() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log).replying(Ok(Reply::Deferred));

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut dmic).unwrap();

    assert_eq!(service.process_request(start(0x01)), Ok(()));
    assert!(service.transport().sink().frames.is_empty());
}

#[test]
fn test_multi_match_in_registration_order() {
    let log = call_log();
    let mut rca = ScriptedProvider::new(ProviderId::RCA, &log);
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log).replying(Ok(Reply::Deferred));
    let mut lca = ScriptedProvider::new(ProviderId::LCA, &log);

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut rca).unwrap();
    service.register_provider(&mut dmic).unwrap();
    service.register_provider(&mut lca).unwrap();

    let req = start(0b0_0101);
    service.process_request(req).unwrap();

    assert_eq!(*log.borrow(), vec![Call::Request(0x04, req), Call::Request(0x01, req)]);
    let sink = service.transport().sink();
    assert_eq!(sink.frames_on(CharacteristicIndex::Rca).len(), 1);
    assert!(sink.frames_on(CharacteristicIndex::Dmic).is_empty());
    assert!(sink.frames_on(CharacteristicIndex::Lca).is_empty());
}

#[test]
fn test_provider_failure_stops_processing() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log).replying(Err(ProviderError::Failed));
    let mut lca = ScriptedProvider::new(ProviderId::LCA, &log);

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut dmic).unwrap();
    service.register_provider(&mut lca).unwrap();

    let req = start(0b0_0011);
    assert_eq!(
        service.process_request(req),
        Err(CsError::ProviderFailed {
            provider: ProviderId::DMIC,
            error: ProviderError::Failed
        })
    );

    // LCA never ran
    assert_eq!(*log.borrow(), vec![Call::Request(0x01, req)]);
    let sink = service.transport().sink();
    assert_eq!(sink.frames_on(CharacteristicIndex::Dmic), vec![b"1/e/UNK_ERROR".to_vec()]);
    assert!(sink.frames_on(CharacteristicIndex::Lca).is_empty());
}

#[test]
fn test_transport_failure_is_fatal_for_request() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log);
    let mut lca = ScriptedProvider::new(ProviderId::LCA, &log);

    let mut server = connected_server();
    server.sink_mut().fail = true;
    let mut service: CustomService<'_, _, _> = CustomService::new(server, ManualClock::default());
    service.register_provider(&mut dmic).unwrap();
    service.register_provider(&mut lca).unwrap();

    let req = Request::new(0b0_0011, OpCode::STOP);
    assert_eq!(
        service.process_request(req),
        Err(CsError::Transport(TransportError::SendFailed))
    );
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn test_not_connected_reply_fails() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log);

    let mut server = connected_server();
    server.on_disconnect(1, Some(0x13)).unwrap();
    let mut service: CustomService<'_, _, _> = CustomService::new(server, ManualClock::default());
    service.register_provider(&mut dmic).unwrap();

    assert_eq!(
        service.process_request(Request::new(0x01, OpCode::STOP)),
        Err(CsError::Transport(TransportError::NotConnected))
    );
}

#[test]
fn test_power_broadcast_reaches_every_power_handler() {
    let log = call_log();
    let mut dmic = ScriptedProvider::new(ProviderId::DMIC, &log);
    let mut lca = ScriptedProvider::new(ProviderId::LCA, &log);
    lca.with_power = false;
    let mut rca = ScriptedProvider::new(ProviderId::RCA, &log);
    rca.power_result = Err(ProviderError::Failed);
    let mut lcf = ScriptedProvider::new(ProviderId::LCF, &log);

    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());
    service.register_provider(&mut dmic).unwrap();
    service.register_provider(&mut lca).unwrap();
    service.register_provider(&mut rca).unwrap();
    service.register_provider(&mut lcf).unwrap();

    service.set_power_mode(PowerMode::Sleep);

    // A failing handler does not stop the broadcast
    assert_eq!(
        *log.borrow(),
        vec![
            Call::Power(0x01, PowerMode::Sleep),
            Call::Power(0x04, PowerMode::Sleep),
            Call::Power(0x08, PowerMode::Sleep),
        ]
    );
}

#[test]
fn test_inject_response() {
    let mut service: CustomService<'_, _, _> = CustomService::new(connected_server(), ManualClock::default());

    service.inject_response(&[0xBEEF, 0x0001], ProviderId::RCF, 3).unwrap();
    assert_eq!(
        service.transport().sink().frames_on(CharacteristicIndex::Rcf),
        vec![vec![0xEF, 0xBE, 0x01]]
    );

    let long = [0u16; 11];
    assert_eq!(
        service.inject_response(&long, ProviderId::RCF, 22),
        Err(CsError::ResponseTooLong)
    );
    assert_eq!(service.transport().sink().frames.len(), 1);
}
