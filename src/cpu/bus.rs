use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::ppu::Ppu;

use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

pub const RAM_SIZE: usize = 0x0800;

const OAM_DMA_LENGTH: u16 = 256;

/// CPU-side memory map and the machine's master clock. Every CPU cycle spent
/// by the interpreter turns into three PPU dots and one APU tick here, in
/// that order, before the next instruction begins.
pub struct Bus {
    ram: [u8; RAM_SIZE],
    pub ppu: Ppu,
    pub apu: Apu,
    pub controllers: [Controller; 2],
    cartridge: Rc<RefCell<dyn Cartridge>>,
    nmi_line: bool,
    irq_line: bool,
    dma_request: Option<u8>,
    dma_page: u8,
    dma_offset: u16,
    cycles: u64,
}

impl Bus {
    pub fn new(cartridge: Rc<RefCell<dyn Cartridge>>, ppu: Ppu) -> Bus {
        Bus {
            ram: [0; RAM_SIZE],
            ppu,
            apu: Apu::new(),
            controllers: [Controller::new(), Controller::new()],
            cartridge,
            nmi_line: false,
            irq_line: false,
            dma_request: None,
            dma_page: 0,
            dma_offset: OAM_DMA_LENGTH,
            cycles: 0,
        }
    }

    pub fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            0x2000..=0x3FFF => self.read_ppu_register(address & 0x0007),
            0x4015 => self.apu.read_status(),
            0x4016 => self.controllers[0].read(),
            0x4017 => self.controllers[1].read(),
            0x4000..=0x401F => 0, // write-only APU/IO space
            0x4020..=0xFFFF => self.cartridge.borrow().read_prg(address),
        }
    }

    pub fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => self.write_ppu_register(address & 0x0007, value),
            0x4014 => self.oam_dma(value),
            0x4016 => {
                let latch = value & 1 == 1;
                for controller in self.controllers.iter_mut() {
                    controller.strobe(latch);
                }
            }
            0x4000..=0x401F => self.apu.write(address, value),
            0x4020..=0xFFFF => self.cartridge.borrow_mut().write_prg(value, address),
        }
    }

    fn read_ppu_register(&mut self, register: u16) -> u8 {
        match register {
            2 => self.ppu.read_status(),
            4 => self.ppu.read_oam_data(),
            7 => self.ppu.read_data(),
            _ => 0, // write-only register
        }
    }

    fn write_ppu_register(&mut self, register: u16, value: u8) {
        match register {
            0 => self.ppu.write_control(value),
            1 => self.ppu.write_mask(value),
            2 => (), // status is read-only
            3 => self.ppu.write_oam_address(value),
            4 => self.ppu.write_oam_data(value),
            5 => self.ppu.write_scroll(value),
            6 => self.ppu.write_address(value),
            7 => self.ppu.write_data(value),
            _ => unreachable!(),
        }
    }

    // A $4014 write only latches the source page; the 256 OAMDATA writes run
    // during the stall cycles the CPU pays afterwards.
    fn oam_dma(&mut self, page: u8) {
        debug!("OAM DMA from page {:#04x}", page);
        self.dma_request = Some(page);
    }

    /// Starts the latched DMA transfer and returns the cycles it steals from
    /// the instruction that triggered it: 513, plus one when that instruction
    /// finished on an odd CPU cycle. Call after the instruction's own cycles
    /// have been advanced.
    pub fn take_dma_stall(&mut self) -> u32 {
        if let Some(page) = self.dma_request.take() {
            self.dma_page = page;
            self.dma_offset = 0;
            513 + (self.cycles & 1) as u32
        } else {
            0
        }
    }

    /// Master pacing: 3 PPU dots and 1 APU tick per CPU cycle. An in-flight
    /// OAM DMA moves one byte per pair of cycles here.
    pub fn advance_cycles(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.ppu.tick();
            self.ppu.tick();
            self.ppu.tick();
            self.apu.tick();
            self.cycles += 1;
            self.dma_step();
        }
        if self.ppu.take_nmi_request() {
            self.nmi_line = true;
        }
    }

    // Each byte takes a get/put pair: the source read on the even half, the
    // OAM write on the odd one.
    fn dma_step(&mut self) {
        if self.dma_offset >= OAM_DMA_LENGTH {
            return;
        }
        if self.cycles & 1 == 1 {
            let address = ((self.dma_page as u16) << 8) + self.dma_offset;
            let value = self.read(address);
            self.ppu.write_oam_data(value);
            self.dma_offset += 1;
        }
    }

    pub fn pull_nmi(&mut self) {
        self.nmi_line = true;
    }

    pub fn pull_irq(&mut self) {
        self.irq_line = true;
    }

    pub fn reset_irq(&mut self) {
        self.irq_line = false;
    }

    /// Consumes the latched NMI edge, if any.
    pub fn poll_nmi(&mut self) -> bool {
        let pulled = self.nmi_line;
        self.nmi_line = false;
        pulled
    }

    pub fn irq_asserted(&self) -> bool {
        self.irq_line
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{BasicCartridge, Mirroring};
    use crate::ppu::bus::Bus as PpuBus;

    fn bus() -> Bus {
        let cartridge: Rc<RefCell<dyn Cartridge>> = Rc::new(RefCell::new(BasicCartridge::new(
            vec![0; 0x8000],
            Vec::new(),
            Mirroring::Vertical,
        )));
        let ppu = Ppu::new(PpuBus::new(cartridge.clone()));
        Bus::new(cartridge, ppu)
    }

    #[test]
    fn ram_round_trips_through_every_mirror() {
        let mut bus = bus();
        bus.write(0x0041, 0x99);
        assert_eq!(bus.read(0x0041), 0x99);
        assert_eq!(bus.read(0x0841), 0x99);
        assert_eq!(bus.read(0x1041), 0x99);
        assert_eq!(bus.read(0x1841), 0x99);

        bus.write(0x1FFF, 0x12);
        assert_eq!(bus.read(0x07FF), 0x12);
    }

    #[test]
    fn unmapped_io_reads_as_zero() {
        let mut bus = bus();
        bus.write(0x4002, 0xFF);
        assert_eq!(bus.read(0x4002), 0);
        assert_eq!(bus.read(0x4013), 0);
    }

    #[test]
    fn oam_dma_copies_a_full_page() {
        let mut bus = bus();
        for i in 0..256u16 {
            bus.write(0x0700 + i, i as u8);
        }
        bus.write(0x2003, 0); // OAMADDR = 0
        bus.write(0x4014, 0x07);

        let stall = bus.take_dma_stall();
        assert_eq!(stall, 513);
        assert_eq!(bus.take_dma_stall(), 0, "stall is consumed once");
        bus.advance_cycles(stall);

        for i in 0..=255u8 {
            bus.write(0x2003, i);
            assert_eq!(bus.read(0x2004), i);
        }
    }

    #[test]
    fn oam_dma_wraps_around_oamaddr() {
        let mut bus = bus();
        for i in 0..256u16 {
            bus.write(0x0300 + i, i as u8);
        }
        bus.write(0x2003, 0x10);
        bus.write(0x4014, 0x03);
        let stall = bus.take_dma_stall();
        bus.advance_cycles(stall);

        // Byte 0 of the page landed at OAM[0x10], the tail wrapped to the
        // start of OAM.
        bus.write(0x2003, 0x10);
        assert_eq!(bus.read(0x2004), 0);
        bus.write(0x2003, 0x0F);
        assert_eq!(bus.read(0x2004), 0xFF);
    }

    #[test]
    fn oam_dma_is_paced_across_the_stall() {
        let mut bus = bus();
        for i in 0..256u16 {
            bus.write(0x0600 + i, 0xAA);
        }
        bus.write(0x2003, 0);
        bus.write(0x4014, 0x06);
        let stall = bus.take_dma_stall();

        // Partway through the stall the head of OAM is filled, the tail is
        // still untouched.
        bus.advance_cycles(100);
        bus.write(0x2003, 10);
        assert_eq!(bus.read(0x2004), 0xAA);
        bus.write(0x2003, 200);
        assert_eq!(bus.read(0x2004), 0);

        bus.advance_cycles(stall - 100);
        bus.write(0x2003, 200);
        assert_eq!(bus.read(0x2004), 0xAA);
    }

    #[test]
    fn dma_stall_costs_an_extra_cycle_when_misaligned() {
        let mut bus = bus();
        bus.advance_cycles(3);
        bus.write(0x4014, 0x00);
        assert_eq!(bus.take_dma_stall(), 514);
    }

    #[test]
    fn controller_strobe_routes_through_4016() {
        use crate::controller::Button;

        let mut bus = bus();
        bus.controllers[0].set_button(Button::B, true);
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);

        let bits: Vec<u8> = (0..8).map(|_| bus.read(0x4016)).collect();
        assert_eq!(bits, vec![0, 1, 0, 0, 0, 0, 0, 0]);
    }
}
