#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;

// WiFi imports
use esp_wifi::wifi::{self, WifiController, WifiDevice};

// Embassy-net imports
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_time::{Duration, Instant, with_timeout};
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

// Import our library modules
use lamp_board_rs::config;
use lamp_board_rs::handler::{CommandHandler, Event};
use lamp_board_rs::led_control::{LedcOutput, init_ledc_output};
use lamp_board_rs::storage::FlashConfigStore;
use lamp_board_rs::wifi::{AccessPoint, ApLinkMonitor};
use lamp_board_rs::ws_server::{EVENTS, WsTransport, run_http_page, run_ws_slot};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

// Static cells for embassy components
static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<8>> = StaticCell::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("[PANIC] {}", info);
    loop {}
}

// Embassy task to run the network stack
#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

/// Access point and station tracking
#[embassy_executor::task]
async fn wifi_task(controller: WifiController<'static>) {
    let mut access_point = AccessPoint::new(controller);
    if let Err(e) = access_point.start().await {
        log::error!("[WIFI] Access point failed to start: {}", e);
        return;
    }

    loop {
        let count = access_point.next_station_count().await;
        // Never drop a count
        EVENTS.send(Event::StationsChanged(count)).await;
    }
}

/// DHCP server for access point clients
#[embassy_executor::task]
async fn dhcp_task(stack: Stack<'static>) {
    stack.wait_link_up().await;
    let [a, b, c, d] = config::AP_IP;
    lamp_board_rs::dhcp::run_dhcp_server(stack, Ipv4Address::new(a, b, c, d)).await;
}

/// Control page server
#[embassy_executor::task]
async fn http_task(stack: Stack<'static>) -> ! {
    stack.wait_config_up().await;
    run_http_page(stack).await
}

/// WebSocket connection slots
#[embassy_executor::task(pool_size = 4)]
async fn ws_task(stack: Stack<'static>, slot: u8) -> ! {
    stack.wait_config_up().await;
    run_ws_slot(stack, slot).await
}

/// Owns the lamp state: drains events, ticks the output, broadcasts status
#[embassy_executor::task]
async fn control_task(output: LedcOutput<'static>, store: FlashConfigStore) -> ! {
    let tick = Duration::from_millis(config::TICK_INTERVAL_MS);
    let mut handler = CommandHandler::new(
        output,
        store,
        ApLinkMonitor,
        WsTransport,
        Instant::now().as_millis(),
    );

    log::info!("[MAIN] Control loop running");
    loop {
        if let Ok(event) = with_timeout(tick, EVENTS.receive()).await {
            handler.handle_event(event, Instant::now().as_millis());
        }
        handler.poll(Instant::now().as_millis());
    }
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Initialize heap allocator for WiFi (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Initialize WiFi driver
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(init) => init,
        Err(e) => {
            log::error!("[WIFI] Driver init failed: {:?}", e);
            panic!("WiFi driver initialization failed");
        }
    };
    let wifi_init_ref = WIFI_INIT_CELL.init(wifi_init);

    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init_ref, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("[WIFI] Controller creation failed: {:?}", e);
            panic!("WiFi controller creation failed");
        }
    };
    log::info!("[WIFI] WiFi controller and AP device created");

    // Static address; clients are served by our own DHCP server
    let [a, b, c, d] = config::AP_IP;
    let ap_ip = Ipv4Address::new(a, b, c, d);
    let net_config = Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(ap_ip, config::AP_PREFIX_LEN),
        gateway: Some(ap_ip),
        dns_servers: Default::default(),
    });
    let (stack, runner) = embassy_net::new(
        wifi_interfaces.ap,
        net_config,
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );
    log::info!("[WIFI] Embassy-net stack created at {}", ap_ip);

    // LED on LEDC channel 0
    let output = match init_ledc_output(peripherals.LEDC, peripherals.GPIO12) {
        Ok(output) => output,
        Err(e) => {
            log::error!("[LED] {}", e);
            panic!("LEDC initialization failed");
        }
    };

    let store = FlashConfigStore::new();

    log::info!(
        "[MAIN] lamp-board {} starting AP '{}', page on port {}, WebSocket on port {}",
        lamp_board_rs::VERSION,
        config::AP_SSID,
        config::HTTP_PORT,
        config::WS_PORT
    );

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        log::info!("[MAIN] Spawning tasks...");
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(wifi_task(wifi_controller)).ok();
        spawner.spawn(dhcp_task(stack)).ok();
        spawner.spawn(http_task(stack)).ok();
        for slot in 0..config::MAX_CLIENTS as u8 {
            if let Err(e) = spawner.spawn(ws_task(stack, slot)) {
                log::error!("[MAIN] Failed to spawn WebSocket slot {}: {:?}", slot, e);
            }
        }
        spawner.spawn(control_task(output, store)).ok();
    });
}

