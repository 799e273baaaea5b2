#![no_std]
#![no_main]

mod server;

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{error, info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select, select3, Either3};
use embassy_nrf::interrupt::{self, InterruptExt};
use embassy_nrf::{bind_interrupts, pdm, peripherals, saadc, Peri};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use nrf_softdevice::ble::advertisement_builder::{Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload};
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::{raw, Config as SdConfig, Softdevice};
use panic_probe as _;

use ccs_audio_firmware::ble::connection::INVALID_CONN_HANDLE;
use ccs_audio_firmware::ble::ccs::CcsServer;
use ccs_audio_firmware::core::double_buffer::DoubleBuffer;
use ccs_audio_firmware::core::protocol::StreamMode;
use ccs_audio_firmware::core::transport::Transport;
use ccs_audio_firmware::cs::CustomService;
use ccs_audio_firmware::providers::{AudioBuffer, AudioProvider, CapturePath, Clock, FeatureProvider, Provider};
use server::{CcsGattServer, GattWrite, SoftdeviceSink};

bind_interrupts!(struct Irqs {
    PDM => pdm::InterruptHandler<peripherals::PDM>;
    SAADC => saadc::InterruptHandler;
});

/// Build-time selection of sources and sampling
struct FirmwareConfig {
    dmic: bool,
    channel_audio: bool,
    channel_features: bool,
    saadc_period: Duration,
    poll_period: Duration,
}

const CONFIG: FirmwareConfig = FirmwareConfig {
    dmic: true,
    channel_audio: true,
    channel_features: true,
    saadc_period: Duration::from_micros(125), // 8 kHz
    poll_period: Duration::from_millis(2),
};

/// Samples per feature block
const FEATURE_BLOCK: usize = 64;

static DMIC_BUFFER: AudioBuffer<i32> = DoubleBuffer::new();
static LCA_BUFFER: AudioBuffer<i16> = DoubleBuffer::new();
static RCA_BUFFER: AudioBuffer<i16> = DoubleBuffer::new();
static LCF_BUFFER: DoubleBuffer<i16, FEATURE_BLOCK> = DoubleBuffer::new();
static RCF_BUFFER: DoubleBuffer<i16, FEATURE_BLOCK> = DoubleBuffer::new();

static DMIC_ENABLED: AtomicBool = AtomicBool::new(false);
static LCA_ENABLED: AtomicBool = AtomicBool::new(false);
static RCA_ENABLED: AtomicBool = AtomicBool::new(false);
static LCF_ENABLED: AtomicBool = AtomicBool::new(false);
static RCF_ENABLED: AtomicBool = AtomicBool::new(false);

static DMIC_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static SAADC_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();
/// Raised by the producers when a half fills
static DATA_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

const RELEASE_BLOCK: usize = StreamMode::Release.samples_per_packet();
const DEBUG_BLOCK: usize = StreamMode::Debug.samples_per_packet();

/// Events from the BLE loop to the dispatch loop
enum BleEvent {
    Connected(Connection),
    Disconnected { handle: u16 },
    Write(GattWrite),
}

static BLE_EVENTS: Channel<ThreadModeRawMutex, BleEvent, 8> = Channel::new();

/// Capture path gated by a flag the producer task watches
struct GatedCapture {
    enabled: &'static AtomicBool,
    wake: &'static Signal<CriticalSectionRawMutex, ()>,
}

impl CapturePath for GatedCapture {
    fn enable(&mut self) {
        self.enabled.store(true, Ordering::Release);
        self.wake.signal(());
    }

    fn disable(&mut self) {
        self.enabled.store(false, Ordering::Release);
    }
}

struct UptimeClock;

impl Clock for UptimeClock {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting CCS audio firmware");

    // Configure interrupt priorities to avoid SoftDevice reserved levels (0, 1, 4)
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::PDM.set_priority(interrupt::Priority::P3);
    interrupt::SAADC.set_priority(interrupt::Priority::P3);

    let sd = Softdevice::enable(&softdevice_config());
    let gatt = unwrap!(CcsGattServer::new(sd));
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(softdevice_task(sd)));

    if CONFIG.dmic {
        unwrap!(spawner.spawn(dmic_task(p.PDM, p.P0_26, p.P0_25)));
    }
    if CONFIG.channel_audio || CONFIG.channel_features {
        unwrap!(spawner.spawn(saadc_task(p.SAADC, p.P0_02, p.P0_03)));
    }

    let mut dmic = AudioProvider::dmic(&DMIC_BUFFER, gated(&DMIC_ENABLED, &DMIC_WAKE), UptimeClock);
    let mut lca = AudioProvider::left_channel(&LCA_BUFFER, gated(&LCA_ENABLED, &SAADC_WAKE), UptimeClock);
    let mut rca = AudioProvider::right_channel(&RCA_BUFFER, gated(&RCA_ENABLED, &SAADC_WAKE), UptimeClock);
    let mut lcf = FeatureProvider::left_channel(&LCF_BUFFER, gated(&LCF_ENABLED, &SAADC_WAKE), UptimeClock);
    let mut rcf = FeatureProvider::right_channel(&RCF_BUFFER, gated(&RCF_ENABLED, &SAADC_WAKE), UptimeClock);

    let mut ccs = CcsServer::new(SoftdeviceSink::new(&gatt));
    ccs.on_registered();
    let mut service: CustomService<'_, _, _> = CustomService::new(ccs, UptimeClock);

    if CONFIG.dmic {
        register(&mut service, &mut dmic);
    }
    if CONFIG.channel_audio {
        register(&mut service, &mut lca);
        register(&mut service, &mut rca);
    }
    if CONFIG.channel_features {
        register(&mut service, &mut lcf);
        register(&mut service, &mut rcf);
    }
    info!(
        "CS ready with {} providers, mask {:#x}",
        service.provider_count(),
        service.registry().ids()
    );

    let ble = run_bluetooth(sd, &gatt);
    let dispatch = async {
        loop {
            let event = select3(BLE_EVENTS.receive(), DATA_READY.wait(), Timer::after(CONFIG.poll_period)).await;
            match event {
                Either3::First(BleEvent::Connected(conn)) => {
                    let handle = conn.handle().unwrap_or(INVALID_CONN_HANDLE);
                    let ccs = service.transport_mut();
                    match ccs.on_connect(handle) {
                        Ok(()) => ccs.sink_mut().attach(conn),
                        Err(e) => warn!("connect rejected: {:?}", e),
                    }
                }
                Either3::First(BleEvent::Disconnected { handle }) => {
                    service.transport_mut().sink_mut().detach();
                    // The SoftDevice run loop does not report the HCI reason
                    service.on_disconnect(handle, None);
                }
                Either3::First(BleEvent::Write(write)) => {
                    if write.truncated {
                        warn!("write to {:?} longer than {} bytes dropped", write.attr, write.data.len());
                    } else if let Err(e) = service.on_gatt_write(write.attr, write.offset, &write.data) {
                        warn!("write to {:?} failed: {:?}", write.attr, e);
                    }
                }
                Either3::Second(()) | Either3::Third(()) => {}
            }

            service.poll_providers();
        }
    };

    select(ble, dispatch).await;
}

fn gated(enabled: &'static AtomicBool, wake: &'static Signal<CriticalSectionRawMutex, ()>) -> GatedCapture {
    GatedCapture { enabled, wake }
}

/// Rejections are logged by the service; boot continues without the provider.
fn register<'a, T: Transport, C: Clock>(service: &mut CustomService<'a, T, C>, provider: &'a mut dyn Provider) {
    let _ = service.register_provider(provider);
}

fn softdevice_config() -> SdConfig {
    SdConfig {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        common_vs_uuid: Some(raw::ble_common_cfg_vs_uuid_t { vs_uuid_count: 8 }),
        conn_gatts: Some(raw::ble_gatts_conn_cfg_t { hvn_tx_queue_size: 8 }),
        ..Default::default()
    }
}

async fn run_bluetooth(sd: &'static Softdevice, gatt: &CcsGattServer) {
    static ADV_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
        .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
        .full_name("CCS-Audio")
        .build();

    static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new().build();

    loop {
        let config = peripheral::Config::default();
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &ADV_DATA,
            scan_data: &SCAN_DATA,
        };

        let conn = match peripheral::advertise_connectable(sd, adv, &config).await {
            Ok(conn) => conn,
            Err(e) => {
                error!("BLE advertising failed: {:?}", defmt::Debug2Format(&e));
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };

        let handle = conn.handle().unwrap_or(INVALID_CONN_HANDLE);
        BLE_EVENTS.send(BleEvent::Connected(conn.clone())).await;

        // Returns when the connection gets disconnected
        let e = gatt_server::run(&conn, gatt, |write| {
            if BLE_EVENTS.try_send(BleEvent::Write(write)).is_err() {
                warn!("BLE event queue full, write dropped");
            }
        })
        .await;
        info!("gatt_server run exited: {:?}", defmt::Debug2Format(&e));

        BLE_EVENTS.send(BleEvent::Disconnected { handle }).await;
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

/// PDM microphone producer
#[embassy_executor::task]
async fn dmic_task(
    pdm_periph: Peri<'static, peripherals::PDM>,
    clk: Peri<'static, peripherals::P0_26>,
    din: Peri<'static, peripherals::P0_25>,
) {
    let mut pdm = pdm::Pdm::new(pdm_periph, Irqs, clk, din, pdm::Config::default());

    loop {
        while !DMIC_ENABLED.load(Ordering::Acquire) {
            DMIC_WAKE.wait().await;
        }

        // One PDM block per buffer half
        let block_len = DMIC_BUFFER.block_len();
        info!("DMIC: capture running, {} samples/block", block_len);
        let result = if block_len == DEBUG_BLOCK {
            let mut bufs = [[0i16; DEBUG_BLOCK]; 2];
            pdm.run(&mut bufs, |block| on_dmic_block(block)).await
        } else {
            let mut bufs = [[0i16; RELEASE_BLOCK]; 2];
            pdm.run(&mut bufs, |block| on_dmic_block(block)).await
        };
        if let Err(e) = result {
            warn!("DMIC: sampler stopped: {:?}", defmt::Debug2Format(&e));
        }
        info!("DMIC: capture idle, {} overruns", DMIC_BUFFER.overruns());
    }
}

/// Stops the sampler on disable or when a new session changed the block length.
fn on_dmic_block(block: &[i16]) -> pdm::SamplerState {
    for sample in block {
        DMIC_BUFFER.push(*sample as i32);
    }
    if DMIC_BUFFER.has_pending() {
        DATA_READY.signal(());
    }

    if DMIC_ENABLED.load(Ordering::Acquire) && block.len() == DMIC_BUFFER.block_len() {
        pdm::SamplerState::Sampled
    } else {
        pdm::SamplerState::Stopped
    }
}

/// Left/right channel producer: one SAADC sample per channel per tick
#[embassy_executor::task]
async fn saadc_task(
    saadc_periph: Peri<'static, peripherals::SAADC>,
    left: Peri<'static, peripherals::P0_02>,
    right: Peri<'static, peripherals::P0_03>,
) {
    let config = saadc::Config::default();
    let channels = [
        saadc::ChannelConfig::single_ended(left),
        saadc::ChannelConfig::single_ended(right),
    ];
    let mut adc = saadc::Saadc::new(saadc_periph, Irqs, config, channels);
    adc.calibrate().await;

    let any_enabled = || {
        [&LCA_ENABLED, &RCA_ENABLED, &LCF_ENABLED, &RCF_ENABLED]
            .iter()
            .any(|flag| flag.load(Ordering::Acquire))
    };

    loop {
        while !any_enabled() {
            SAADC_WAKE.wait().await;
        }

        let mut ticker = Ticker::every(CONFIG.saadc_period);
        while any_enabled() {
            let mut sample = [0i16; 2];
            adc.sample(&mut sample).await;

            if LCA_ENABLED.load(Ordering::Acquire) {
                LCA_BUFFER.push(sample[0]);
            }
            if RCA_ENABLED.load(Ordering::Acquire) {
                RCA_BUFFER.push(sample[1]);
            }
            if LCF_ENABLED.load(Ordering::Acquire) {
                LCF_BUFFER.push(sample[0]);
            }
            if RCF_ENABLED.load(Ordering::Acquire) {
                RCF_BUFFER.push(sample[1]);
            }
            if LCA_BUFFER.has_pending() || RCA_BUFFER.has_pending() || LCF_BUFFER.has_pending() || RCF_BUFFER.has_pending() {
                DATA_READY.signal(());
            }
            ticker.next().await;
        }
    }
}
