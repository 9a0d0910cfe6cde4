//! Dual-CDC USB composite device.
//!
//! CDC0 carries the operator console. CDC1 carries the line protocol spoken
//! with the payment relay running on the host. The wrapper hands out per-port
//! handles so the tasks never touch Embassy's builder bookkeeping.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
#[cfg(target_os = "none")]
use embassy_usb::driver::Driver;
#[cfg(target_os = "none")]
use embassy_usb::{Builder, Config, UsbDevice};

/// Logical identifier for each CDC interface, in descriptor order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbPortKind {
    /// Operator console on CDC0.
    Console,
    /// Payment relay link on CDC1.
    Relay,
}

impl UsbPortKind {
    pub const fn index(self) -> usize {
        match self {
            UsbPortKind::Console => 0,
            UsbPortKind::Relay => 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            UsbPortKind::Console => "console",
            UsbPortKind::Relay => "relay",
        }
    }
}

/// Bulk endpoint packet size; matches [`crate::line::FRAME_SIZE`].
pub const MAX_PACKET_SIZE: u16 = 64;

/// pid.codes test VID.
const VENDOR_ID: u16 = 0x1209;
const PRODUCT_ID: u16 = 0x7e57;
const DESCRIPTOR_LEN: usize = 256;

/// Strings advertised in the device descriptor.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "PIX Vending",
            product: "Vending Terminal",
            serial_number: None,
        }
    }
}

/// Descriptor buffers and CDC state; must outlive the device.
#[cfg(target_os = "none")]
pub struct UsbDeviceStorage {
    control: [u8; 64],
    config: [u8; DESCRIPTOR_LEN],
    bos: [u8; DESCRIPTOR_LEN],
    msos: [u8; DESCRIPTOR_LEN],
    cdc: [State<'static>; 2],
}

#[cfg(target_os = "none")]
impl UsbDeviceStorage {
    pub fn new() -> Self {
        Self {
            control: [0; 64],
            config: [0; DESCRIPTOR_LEN],
            bos: [0; DESCRIPTOR_LEN],
            msos: [0; DESCRIPTOR_LEN],
            cdc: [State::new(), State::new()],
        }
    }
}

/// Split halves of one CDC ACM interface.
#[cfg(target_os = "none")]
pub struct CdcAcmHandle<D: Driver<'static>> {
    kind: UsbPortKind,
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

#[cfg(target_os = "none")]
impl<D> CdcAcmHandle<D>
where
    D: Driver<'static>,
{
    pub fn kind(&self) -> UsbPortKind {
        self.kind
    }

    /// Waits until the host enables both bulk endpoints.
    pub async fn wait_ready(&mut self) {
        embassy_futures::join::join(
            self.sender.wait_connection(),
            self.receiver.wait_connection(),
        )
        .await;
    }

    /// `true` while the host holds DTR.
    pub fn dtr(&self) -> bool {
        self.sender.dtr()
    }
}

/// The USB device plus the CDC handles not yet claimed by a task.
#[cfg(target_os = "none")]
pub struct UsbComposite<D>
where
    D: Driver<'static>,
{
    pub device: UsbDevice<'static, D>,
    ports: [Option<CdcAcmHandle<D>>; 2],
}

#[cfg(target_os = "none")]
impl<D> UsbComposite<D>
where
    D: Driver<'static>,
{
    pub fn new(
        driver: D,
        storage: &'static mut UsbDeviceStorage,
        strings: UsbDeviceStrings,
    ) -> Self {
        let mut config = Config::new(VENDOR_ID, PRODUCT_ID);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = 64;
        config.max_power = 100;
        // Miscellaneous class / IAD, one ACM function per interface pair.
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let UsbDeviceStorage {
            control,
            config: config_descriptor,
            bos,
            msos,
            cdc,
        } = storage;
        let mut builder = Builder::new(driver, config, config_descriptor, bos, msos, control);

        let [console_state, relay_state] = cdc;
        let console = split(
            UsbPortKind::Console,
            CdcAcmClass::new(&mut builder, console_state, MAX_PACKET_SIZE),
        );
        let relay = split(
            UsbPortKind::Relay,
            CdcAcmClass::new(&mut builder, relay_state, MAX_PACKET_SIZE),
        );

        Self {
            device: builder.build(),
            ports: [Some(console), Some(relay)],
        }
    }

    /// Claims the handles for `kind`; `None` once already taken.
    pub fn take_port(&mut self, kind: UsbPortKind) -> Option<CdcAcmHandle<D>> {
        self.ports[kind.index()].take()
    }
}

#[cfg(target_os = "none")]
fn split<D>(kind: UsbPortKind, class: CdcAcmClass<'static, D>) -> CdcAcmHandle<D>
where
    D: Driver<'static>,
{
    let (sender, receiver, control) = class.split_with_control();
    CdcAcmHandle {
        kind,
        sender,
        receiver,
        control,
    }
}
