#![no_std]
#![no_main]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{Config, IpAddress, IpEndpoint, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::rmt::Rmt;
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_hal_embassy::Executor;
use esp_hal_smartled::{SmartLedsAdapter, smart_led_buffer};
use esp_println::println;
use esp_storage::FlashStorage;
use esp_wifi::wifi;
use log::{error, info, warn};
use static_cell::StaticCell;

use camlink_rs::channel::CommandChannel;
use camlink_rs::clock::{Clock, SystemClock};
use camlink_rs::config;
use camlink_rs::credentials::{CredentialStore, WifiCredentials};
use camlink_rs::led_control::{self, LedCommand, LedObserver, LedReceiver, LedSender, StatusLed};
use camlink_rs::network::{self, NetworkInfo, NetworkStatus, ProvisionOutcome};
use camlink_rs::proxy::{CameraProxy, RemoteCamera};
use camlink_rs::relay::{self, AiRelay, HttpError, HttpResponse, Method, Url};
use camlink_rs::state_machine::{Action, SystemEvent, SystemStateMachine};
use camlink_rs::web::{self, Route, WebAction, WebContext};
use camlink_rs::wifi::WiFiManager;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type SerialPort = Uart<'static, Blocking>;
type CameraLink = RemoteCamera<SerialPort, SystemClock, LedObserver>;
type LedWriter = SmartLedsAdapter<esp_hal::rmt::Channel<Blocking, 0>, 25>;

/// State shared by the web and state machine tasks
struct Controller {
    camera: CameraLink,
    relay: AiRelay,
    network: NetworkStatus,
    store: CredentialStore<FlashStorage>,
}

type Shared = Mutex<CriticalSectionRawMutex, Controller>;

const MAX_RESPONSE_BYTES: usize = 8 * 1024;

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static WIFI_MANAGER_CELL: StaticCell<WiFiManager<'static>> = StaticCell::new();
static CONTROLLER_CELL: StaticCell<Shared> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

static SERVICES_UP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static RESTART: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[PANIC] {}", info);
    loop {}
}

fn restart() -> ! {
    esp_hal::system::software_reset();
    #[allow(unreachable_code)]
    loop {}
}

/// Unrecoverable boot failure: log and reset
fn fatal<E: core::fmt::Debug>(what: &str, e: E) -> ! {
    error!("[MAIN] {} failed: {:?}", what, e);
    restart()
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, wifi::WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn led_task(led: StatusLed<LedWriter>, receiver: LedReceiver) -> ! {
    led_control::run_led(led, receiver).await
}

#[embassy_executor::task]
async fn state_machine_task(
    wifi_manager: &'static mut WiFiManager<'static>,
    mut console: CommandChannel<SerialPort, SystemClock>,
    shared: &'static Shared,
    leds: LedSender,
    credentials: Option<WifiCredentials>,
    boot_event: SystemEvent,
) -> ! {
    info!("[STATE] Starting state machine task");
    let mut sm = SystemStateMachine::new();
    sm.handle_event(boot_event);
    let mut shown = None;

    loop {
        for action in sm.update() {
            match action {
                Action::UpdateLEDStatus(status) => {
                    if shown != Some(status) {
                        let _ = leds.try_send(LedCommand::Status(status));
                        shown = Some(status);
                    }
                }
                Action::PromptCredentials => {
                    let mut ctl = shared.lock().await;
                    match network::provision_interactive(
                        &mut console,
                        &mut ctl.store,
                        config::PROVISION_TIMEOUT_MS,
                    ) {
                        Ok(ProvisionOutcome::Saved(_)) => {
                            sm.handle_event(SystemEvent::CredentialsProvisioned);
                        }
                        Ok(outcome) => info!("[WIFI] Provisioning: {:?}", outcome),
                        Err(e) => warn!("[WIFI] Provisioning failed: {}", e),
                    }
                }
                Action::ConnectWiFi => {
                    let Some(creds) = credentials.as_ref() else {
                        sm.handle_event(SystemEvent::RestartRequested);
                        continue;
                    };
                    match wifi_manager.connect(creds).await {
                        Ok(()) => {
                            shared.lock().await.network = wifi_manager.status().clone();
                            sm.handle_event(SystemEvent::WiFiConnected);
                        }
                        Err(e) => {
                            warn!("[WIFI] {}", e);
                            sm.handle_event(SystemEvent::WiFiConnectionFailed);
                            sm.increment_retry();
                        }
                    }
                }
                Action::StartServices => {
                    SERVICES_UP.signal(());
                    sm.mark_services_started();
                    check_relay_health(wifi_manager.stack(), shared).await;
                    sm.handle_event(SystemEvent::ServicesStarted);
                }
                Action::LinkCamera => {
                    let linked = shared.lock().await.camera.begin();
                    match linked {
                        Ok(true) => sm.handle_event(SystemEvent::CameraLinked),
                        Ok(false) => sm.handle_event(SystemEvent::CameraLinkFailed),
                        Err(e) => {
                            warn!("[CAMERA] Link failed: {}", e);
                            sm.handle_event(SystemEvent::CameraLinkFailed)
                        }
                    };
                }
                Action::MonitorCamera => {
                    if !wifi_manager.monitor_connection() {
                        shared.lock().await.network.set_disconnected();
                        sm.handle_event(SystemEvent::WiFiDisconnected);
                    } else {
                        let mut ctl = shared.lock().await;
                        if let Err(e) = ctl.camera.poll() {
                            warn!("[CAMERA] Poll failed: {}", e);
                        }
                        let available = ctl.camera.is_available();
                        drop(ctl);
                        sm.handle_event(if available {
                            SystemEvent::CameraRecovered
                        } else {
                            SystemEvent::CameraLost
                        });
                    }
                }
                Action::ServiceRelay => service_relay(wifi_manager.stack(), shared).await,
                Action::ClearCredentials => match shared.lock().await.store.clear() {
                    Ok(()) => {
                        sm.handle_event(SystemEvent::CredentialsCleared);
                    }
                    Err(e) => {
                        error!("[CREDS] Clear failed: {:?}", e);
                        sm.handle_event(SystemEvent::RestartRequested);
                    }
                },
                Action::Restart => {
                    info!("[MAIN] Restarting...");
                    Timer::after(Duration::from_millis(config::RESTART_GRACE_MS as u64)).await;
                    restart();
                }
                Action::LogError(state) => error!("[STATE] Error state: {:?}", state),
            }
        }

        if RESTART.signaled() {
            RESTART.reset();
            sm.handle_event(SystemEvent::RestartRequested);
        }

        Timer::after(Duration::from_millis(100)).await;
    }
}

/// One relay cycle; the mutex is released during the HTTP exchange
async fn service_relay(stack: Stack<'static>, shared: &'static Shared) {
    let (request, timeout_ms) = {
        let mut ctl = shared.lock().await;
        let Controller {
            camera,
            relay,
            network,
            ..
        } = &mut *ctl;
        if !relay.due(SystemClock.now_ms()) {
            return;
        }
        (relay.prepare(camera, &*network), relay.timeout_ms())
    };
    let Some(request) = request else {
        return;
    };
    let result = http_request(stack, Method::Post, &request.url, Some(&request.body), timeout_ms).await;
    shared.lock().await.relay.complete(result);
}

async fn check_relay_health(stack: Stack<'static>, shared: &'static Shared) {
    let (url, timeout_ms) = {
        let ctl = shared.lock().await;
        if !ctl.relay.api().is_configured() || !ctl.network.is_connected() {
            return;
        }
        (ctl.relay.api().health_url(), ctl.relay.timeout_ms())
    };
    match http_request(stack, Method::Get, &url, None, timeout_ms).await {
        Ok(response) if response.status == 200 => info!("[RELAY] AI endpoint reachable"),
        Ok(response) => warn!("[RELAY] Health check returned HTTP {}", response.status),
        Err(e) => warn!("[RELAY] Health check failed: {}", e),
    }
}

async fn http_request(
    stack: Stack<'_>,
    method: Method,
    url: &str,
    body: Option<&str>,
    timeout_ms: u64,
) -> Result<HttpResponse, HttpError> {
    let exchange = http_exchange(stack, method, url, body);
    match embassy_time::with_timeout(Duration::from_millis(timeout_ms), exchange).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Timeout),
    }
}

async fn http_exchange(
    stack: Stack<'_>,
    method: Method,
    url: &str,
    body: Option<&str>,
) -> Result<HttpResponse, HttpError> {
    let url = Url::parse(url)?;
    let address = match url.host.parse::<Ipv4Addr>() {
        Ok(ip) => IpAddress::Ipv4(ip),
        Err(_) => *stack
            .dns_query(url.host, DnsQueryType::A)
            .await
            .map_err(|_| HttpError::Connect)?
            .first()
            .ok_or(HttpError::Connect)?,
    };

    let mut rx_buffer = [0u8; 2048];
    let mut tx_buffer = [0u8; 2048];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket
        .connect(IpEndpoint::new(address, url.port))
        .await
        .map_err(|_| HttpError::Connect)?;

    let head = relay::request_head(method, &url, body.map(str::len));
    write_all(&mut socket, head.as_bytes()).await?;
    if let Some(body) = body {
        write_all(&mut socket, body.as_bytes()).await?;
    }
    socket.flush().await.map_err(|_| HttpError::Write)?;

    let mut response = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_RESPONSE_BYTES.saturating_sub(response.len());
                response.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(_) => break,
        }
    }
    socket.close();
    relay::parse_response(&response)
}

async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), HttpError> {
    while !data.is_empty() {
        match socket.write(data).await {
            Ok(0) | Err(_) => return Err(HttpError::Write),
            Ok(n) => data = &data[n..],
        }
    }
    Ok(())
}

/// First line of the request; the rest of the head is ignored
async fn read_request_line(socket: &mut TcpSocket<'_>) -> Option<String> {
    let mut head = [0u8; 1024];
    let mut len = 0;
    while len < head.len() {
        match socket.read(&mut head[len..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => len += n,
        }
        if head[..len].windows(2).any(|w| w == b"\r\n") {
            break;
        }
    }
    let text = core::str::from_utf8(&head[..len]).ok()?;
    text.lines().next().map(String::from)
}

async fn stream_frames(socket: &mut TcpSocket<'_>, shared: &'static Shared) {
    loop {
        let frame = shared.lock().await.camera.capture_jpeg();
        let Ok(jpeg) = frame else {
            warn!("[WEB] Frame capture failed");
            break;
        };
        let part = web::stream_part_head(jpeg.len());
        if write_all(socket, part.as_bytes()).await.is_err()
            || write_all(socket, &jpeg).await.is_err()
            || socket.flush().await.is_err()
        {
            break;
        }
    }
    info!("[WEB] Stream ended");
}

#[embassy_executor::task]
async fn web_task(stack: Stack<'static>, shared: &'static Shared, leds: LedSender) -> ! {
    SERVICES_UP.wait().await;
    info!("[WEB] Listening on port {}", config::HTTP_PORT);

    let mut rx_buffer = [0u8; 1024];
    let mut tx_buffer = [0u8; 4096];
    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(10)));
        if let Err(e) = socket.accept(config::HTTP_PORT).await {
            warn!("[WEB] Accept failed: {:?}", e);
            continue;
        }
        let _ = leds.try_send(LedCommand::Client);

        let Some(line) = read_request_line(&mut socket).await else {
            socket.close();
            continue;
        };
        info!("[WEB] {}", line);
        let route = Route::from_request_line(&line);

        let handled = {
            let mut ctl = shared.lock().await;
            let Controller {
                camera,
                relay,
                network,
                ..
            } = &mut *ctl;
            let mut ctx = WebContext {
                camera,
                network: &*network,
                relay,
            };
            web::handle_request(route, &mut ctx)
        };

        let response = handled.response;
        let written = match write_all(&mut socket, response.head().as_bytes()).await {
            Ok(()) => write_all(&mut socket, &response.body).await,
            Err(e) => Err(e),
        };
        if written.is_ok() {
            match handled.action {
                WebAction::None => {}
                WebAction::Stream => stream_frames(&mut socket, shared).await,
                WebAction::ClearCredentials => {
                    let _ = socket.flush().await;
                    Timer::after(Duration::from_millis(config::RESTART_GRACE_MS as u64)).await;
                    if let Err(e) = shared.lock().await.store.clear() {
                        error!("[CREDS] Clear failed: {:?}", e);
                    }
                    RESTART.signal(());
                }
            }
        }
        let _ = socket.flush().await;
        socket.close();
        Timer::after(Duration::from_millis(50)).await;
        socket.abort();
    }
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let cpu = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(cpu);

    // Heap for esp-wifi, the relay message and one base64 frame
    esp_alloc::heap_allocator!(size: 128 * 1024);

    println!("camlink controller v{}", camlink_rs::VERSION);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let mut store = CredentialStore::new(FlashStorage::new());
    let stored = store.load().unwrap_or_else(|e| {
        warn!("[CREDS] Could not read credentials: {:?}", e);
        None
    });
    let (credentials, boot_event) = match stored {
        Some(creds) => (Some(creds), SystemEvent::CredentialsLoaded),
        None => match WifiCredentials::new(config::DEFAULT_WIFI_SSID, config::DEFAULT_WIFI_PASSWORD) {
            Ok(creds) => (Some(creds), SystemEvent::DefaultCredentialsLoaded),
            Err(_) => (None, SystemEvent::CredentialsMissing),
        },
    };
    let api = store.load_api_config().unwrap_or_default();
    info!(
        "[CREDS] WiFi {}, AI base '{}'",
        if credentials.is_some() { "configured" } else { "missing" },
        api.base_url()
    );

    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = rng.random();
    let wifi_init = esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK)
        .unwrap_or_else(|e| fatal("WiFi driver init", e));
    let wifi_init = WIFI_INIT_CELL.init(wifi_init);
    let (wifi_controller, interfaces) = wifi::new(wifi_init, peripherals.WIFI)
        .unwrap_or_else(|e| fatal("WiFi controller", e));

    let resources = STACK_RESOURCES.init(StackResources::new());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        Config::dhcpv4(Default::default()),
        resources,
        seed as u64,
    );
    let wifi_manager = WIFI_MANAGER_CELL.init(WiFiManager::new(wifi_controller, stack));

    let camera_uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(config::SERIAL_BAUD_RATE),
    )
    .unwrap_or_else(|e| fatal("camera UART", e))
    .with_tx(peripherals.GPIO17)
    .with_rx(peripherals.GPIO18);
    let console_uart = Uart::new(
        peripherals.UART0,
        UartConfig::default().with_baudrate(config::SERIAL_BAUD_RATE),
    )
    .unwrap_or_else(|e| fatal("console UART", e))
    .with_tx(peripherals.GPIO43)
    .with_rx(peripherals.GPIO44);

    let rmt = Rmt::new(peripherals.RMT, Rate::from_mhz(80)).unwrap_or_else(|e| fatal("RMT", e));
    let writer = SmartLedsAdapter::new(rmt.channel0, peripherals.GPIO48, smart_led_buffer!(1));
    let status_led = StatusLed::new(writer);
    let (led_sender, led_receiver) = led_control::init_led_channel();

    let camera = RemoteCamera::new(
        CommandChannel::new(camera_uart, SystemClock),
        LedObserver(led_sender),
    );
    let relay = AiRelay::new(api, seed, SystemClock.now_ms());
    let shared = CONTROLLER_CELL.init(Mutex::new(Controller {
        camera,
        relay,
        network: NetworkStatus::new(),
        store,
    }));
    let console = CommandChannel::new(console_uart, SystemClock);

    let executor = EXECUTOR.init(Executor::new());
    executor.run(move |spawner| {
        info!("[MAIN] Spawning tasks...");
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(led_task(status_led, led_receiver)).ok();
        spawner.spawn(web_task(stack, shared, led_sender)).ok();
        spawner
            .spawn(state_machine_task(
                wifi_manager,
                console,
                shared,
                led_sender,
                credentials,
                boot_event,
            ))
            .ok();
    });
}
