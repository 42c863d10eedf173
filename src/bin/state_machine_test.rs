//! 灯光模式状态机板上测试程序
//!
//! 在真实的LEDC输出上依次运行各模式，并验证等待模式的快照保存与恢复

#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_println::println;
use lamp_board_rs::led_control::init_ledc_output;
use lamp_board_rs::state_machine::{Mode, ModeParams, ModeStateMachine};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ 测试失败: {}", info);
    loop {}
}

const TICK_MS: u64 = 5;

/// 以固定tick驱动状态机一段时间，返回结束时刻
fn run_for<D: lamp_board_rs::led_control::DutyWriter>(
    machine: &mut ModeStateMachine<D>,
    delay: &Delay,
    mut now_ms: u64,
    duration_ms: u64,
) -> u64 {
    let end = now_ms + duration_ms;
    while now_ms < end {
        machine.tick(now_ms);
        delay.delay_millis(TICK_MS as u32);
        now_ms += TICK_MS;
    }
    now_ms
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let delay = Delay::new();

    println!("=== 灯光模式状态机测试 ===");

    let output = match init_ledc_output(peripherals.LEDC, peripherals.GPIO12) {
        Ok(output) => output,
        Err(e) => panic!("LEDC初始化失败: {}", e),
    };

    // 1. 从存储的闪烁配置启动
    println!("\n1. 启动进入闪烁模式 (3Hz, 亮度200)");
    let stored = ModeParams {
        mode: Mode::Blink,
        blink_hz: 3,
        breathe_period_ms: 1500,
        brightness: 200,
    };
    let mut machine = ModeStateMachine::new(output, stored, 0);
    assert_eq!(machine.mode(), Mode::Blink);
    assert_eq!(machine.tick(0), 0);
    assert_eq!(machine.tick(166), 200);
    let mut now = run_for(&mut machine, &delay, 166, 3000);
    println!("✅ 闪烁模式正常");

    // 2. 呼吸模式
    println!("\n2. 呼吸模式 (周期1500ms)");
    machine.set_breathe(1500);
    machine.set_brightness(255);
    now = run_for(&mut machine, &delay, now, 4500);
    assert_eq!(machine.mode(), Mode::Breathe);
    println!("✅ 呼吸模式正常");

    // 3. 常亮与亮度
    println!("\n3. 常亮模式与亮度调节");
    machine.set_on();
    for duty in [255u8, 128, 32, 200] {
        machine.set_brightness(duty);
        assert_eq!(machine.tick(now), duty);
        now = run_for(&mut machine, &delay, now, 500);
    }
    println!("✅ 常亮模式正常");

    // 4. 等待模式与恢复
    println!("\n4. 等待模式快照与恢复");
    let before = machine.params();
    machine.enter_idle_wait();
    machine.enter_idle_wait();
    assert_eq!(machine.mode(), Mode::IdleWait);
    assert_eq!(machine.saved_before_wait(), Some(before));
    assert_eq!(machine.persisted_params(), before);
    now = run_for(&mut machine, &delay, now, 3200);

    machine.notify_connected();
    assert_eq!(machine.params(), before);
    assert_eq!(machine.saved_before_wait(), None);
    now = run_for(&mut machine, &delay, now, 1000);
    println!("✅ 等待模式快照恢复正常");

    // 5. 关闭
    println!("\n5. 关闭输出");
    machine.set_off();
    assert_eq!(machine.tick(now), 0);

    println!("\n=== 所有测试通过! ===");

    loop {
        delay.delay_millis(1000);
    }
}
