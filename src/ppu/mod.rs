pub mod bus;
pub mod display;
pub mod palette;

use crate::ppu::bus::Bus;
use crate::ppu::display::Display;

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy)]
    pub struct Control: u8 {
        const NAMETABLE_SELECT      = 0b0000_0011;
        const VRAM_INCREMENT_32     = 0b0000_0100;
        const SPRITE_TABLE_HIGH     = 0b0000_1000;
        const BACKGROUND_TABLE_HIGH = 0b0001_0000;
        const TALL_SPRITES          = 0b0010_0000;
        const SLAVE_MODE            = 0b0100_0000;
        const NMI_ENABLE            = 0b1000_0000;
    }
}

bitflags! {
    #[derive(Clone, Copy)]
    pub struct Mask: u8 {
        const GRAYSCALE            = 0b0000_0001;
        const SHOW_BACKGROUND_LEFT = 0b0000_0010;
        const SHOW_SPRITES_LEFT    = 0b0000_0100;
        const SHOW_BACKGROUND      = 0b0000_1000;
        const SHOW_SPRITES         = 0b0001_0000;
        const EMPHASIZE_RED        = 0b0010_0000;
        const EMPHASIZE_GREEN      = 0b0100_0000;
        const EMPHASIZE_BLUE       = 0b1000_0000;
    }
}

const MASK_SPRITE_PALETTE: u8 = 0b0000_0011;
const MASK_SPRITE_BEHIND_BACKGROUND: u8 = 0b0010_0000;
const MASK_FLIP_SPRITE_HORIZONTALLY: u8 = 0b0100_0000;
const MASK_FLIP_SPRITE_VERTICALLY: u8 = 0b1000_0000;

const DOTS_PER_SCANLINE: u16 = 341;
const SCANLINES_PER_FRAME: u16 = 262;
const SCANLINE_VISIBLE_END: u16 = 239;
const SCANLINE_VBLANK_START: u16 = 241;
const SCANLINE_PRERENDER: u16 = 261;

#[derive(Clone, Copy, Default)]
struct SpriteSlot {
    x: u8,
    attributes: u8,
    pattern_low: u8,
    pattern_high: u8,
    is_sprite_zero: bool,
}

pub struct Ppu {
    pub bus: Bus,
    display: Display,

    control: Control,
    mask: Mask,
    vblank: bool,
    sprite_zero_hit: bool,
    sprite_overflow: bool,

    oam_addr: u8,
    oam: [u8; 256],

    // Loopy internals: current and temporary VRAM address (15 bits each),
    // fine X scroll and the shared first/second write toggle.
    vram_address: u16,
    temp_address: u16,
    fine_x: u8,
    write_toggle: bool,
    read_buffer: u8,

    // Background pipeline: the four per-tile latches and the 16-bit shift
    // registers they reload every eighth dot.
    latch_nametable: u8,
    latch_attribute: u8,
    latch_pattern_low: u8,
    latch_pattern_high: u8,
    shift_pattern_low: u16,
    shift_pattern_high: u16,
    shift_attribute_low: u16,
    shift_attribute_high: u16,

    // Sprite pipeline: the eight sprites picked for the next scanline and
    // the slots currently feeding pixels.
    oam_secondary: [u8; 32],
    secondary_count: u8,
    secondary_has_sprite_zero: bool,
    sprites: [SpriteSlot; 8],
    sprite_count: u8,

    dot: u16,
    scanline: u16,
    frame: u64,
    frame_ready: bool,
    nmi_request: bool,
}

impl Ppu {
    pub fn new(bus: Bus) -> Ppu {
        Ppu {
            bus,
            display: Display::new(),
            control: Control::empty(),
            mask: Mask::empty(),
            vblank: false,
            sprite_zero_hit: false,
            sprite_overflow: false,
            oam_addr: 0,
            oam: [0; 256],
            vram_address: 0,
            temp_address: 0,
            fine_x: 0,
            write_toggle: false,
            read_buffer: 0,
            latch_nametable: 0,
            latch_attribute: 0,
            latch_pattern_low: 0,
            latch_pattern_high: 0,
            shift_pattern_low: 0,
            shift_pattern_high: 0,
            shift_attribute_low: 0,
            shift_attribute_high: 0,
            oam_secondary: [0xFF; 32],
            secondary_count: 0,
            secondary_has_sprite_zero: false,
            sprites: [SpriteSlot::default(); 8],
            sprite_count: 0,
            dot: 0,
            scanline: 0,
            frame: 0,
            frame_ready: false,
            nmi_request: false,
        }
    }

    pub fn reset(&mut self) {
        self.control = Control::empty();
        self.mask = Mask::empty();
        self.vblank = false;
        self.sprite_zero_hit = false;
        self.sprite_overflow = false;
        self.write_toggle = false;
        self.read_buffer = 0;
        self.fine_x = 0;
        self.vram_address = 0;
        self.temp_address = 0;
        self.dot = 0;
        self.scanline = 0;
        self.frame_ready = false;
        self.nmi_request = false;
        self.sprite_count = 0;
        self.secondary_count = 0;
    }

    pub fn write_control(&mut self, value: u8) {
        self.control = Control::from_bits_retain(value);
        self.temp_address = (self.temp_address & !0x0C00) | (((value & 0x03) as u16) << 10);
    }

    pub fn write_mask(&mut self, value: u8) {
        self.mask = Mask::from_bits_retain(value);
    }

    pub fn read_status(&mut self) -> u8 {
        let mut value = 0u8;
        if self.sprite_overflow {
            value |= 0x20;
        }
        if self.sprite_zero_hit {
            value |= 0x40;
        }
        if self.vblank {
            value |= 0x80;
        }
        self.vblank = false;
        self.write_toggle = false;
        value
    }

    pub fn write_oam_address(&mut self, value: u8) {
        self.oam_addr = value;
    }

    pub fn write_oam_data(&mut self, value: u8) {
        self.oam[self.oam_addr as usize] = value;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    /// Reads never advance OAMADDR; during vblank the CPU can poll OAM
    /// without disturbing the pointer.
    pub fn read_oam_data(&self) -> u8 {
        self.oam[self.oam_addr as usize]
    }

    pub fn write_scroll(&mut self, value: u8) {
        if !self.write_toggle {
            self.fine_x = value & 0x07;
            self.temp_address = (self.temp_address & !0x001F) | ((value >> 3) as u16);
        } else {
            self.temp_address = (self.temp_address & !0x73E0)
                | (((value & 0x07) as u16) << 12)
                | (((value >> 3) as u16) << 5);
        }
        self.write_toggle = !self.write_toggle;
    }

    pub fn write_address(&mut self, value: u8) {
        if !self.write_toggle {
            // Only six bits of the high byte exist; bit 14 is cleared.
            self.temp_address = (self.temp_address & 0x00FF) | (((value & 0x3F) as u16) << 8);
        } else {
            self.temp_address = (self.temp_address & 0x7F00) | value as u16;
            self.vram_address = self.temp_address;
        }
        self.write_toggle = !self.write_toggle;
    }

    pub fn write_data(&mut self, value: u8) {
        self.bus.write(self.vram_address & 0x3FFF, value);
        self.increment_vram_address();
    }

    pub fn read_data(&mut self) -> u8 {
        let address = self.vram_address & 0x3FFF;
        let result = if address >= 0x3F00 {
            // Palette reads bypass the buffer; the buffer picks up the
            // nametable byte that lives underneath the palette mirror.
            let value = self.bus.read(address);
            self.read_buffer = self.bus.read(address - 0x1000);
            value
        } else {
            let value = self.read_buffer;
            self.read_buffer = self.bus.read(address);
            value
        };
        self.increment_vram_address();
        result
    }

    fn increment_vram_address(&mut self) {
        let step = if self.control.contains(Control::VRAM_INCREMENT_32) {
            32
        } else {
            1
        };
        self.vram_address = self.vram_address.wrapping_add(step) & 0x7FFF;
    }

    /// Advances the PPU by one dot: 341 dots per scanline, 262 scanlines
    /// per frame.
    pub fn tick(&mut self) {
        match self.scanline {
            0..=SCANLINE_VISIBLE_END => self.scanline_visible(),
            SCANLINE_VBLANK_START => {
                if self.dot == 1 {
                    self.vblank = true;
                    if self.control.contains(Control::NMI_ENABLE) {
                        self.nmi_request = true;
                    }
                }
            }
            SCANLINE_PRERENDER => self.scanline_prerender(),
            _ => (), // post-render line and the tail of vblank are idle
        }

        self.dot += 1;
        if self.dot == DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline == SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.frame += 1;
                self.frame_ready = true;
            }
        }
    }

    fn scanline_visible(&mut self) {
        if (1..=256).contains(&self.dot) {
            self.render_pixel();
        }

        if !self.rendering_enabled() {
            return;
        }

        match self.dot {
            1..=64 => {
                // Secondary OAM drains to $FF one byte per pair of dots.
                if self.dot % 2 == 0 {
                    self.oam_secondary[((self.dot - 1) >> 1) as usize] = 0xFF;
                }
            }
            65 => self.evaluate_sprites(),
            257 => self.fetch_sprites(),
            _ => (),
        }

        self.background_cycle();
        self.update_scroll_counters();
    }

    fn scanline_prerender(&mut self) {
        if self.dot == 1 {
            self.vblank = false;
            self.sprite_zero_hit = false;
            self.sprite_overflow = false;
        }

        if !self.rendering_enabled() {
            return;
        }

        self.background_cycle();
        self.update_scroll_counters();

        if self.dot == 257 {
            // Nothing was evaluated on this line, so nothing may carry into
            // scanline 0.
            self.sprite_count = 0;
        }
        if (280..=304).contains(&self.dot) {
            self.copy_vertical_bits();
        }
    }

    // Background fetches run with period 8 over dots 1-256 and again over
    // 321-336 to prime the first two tiles of the next line.
    fn background_cycle(&mut self) {
        match self.dot {
            1..=256 | 321..=336 => {
                self.shift_background();
                match (self.dot - 1) % 8 {
                    0 => self.fetch_nametable_byte(),
                    2 => self.fetch_attribute_byte(),
                    4 => self.fetch_pattern_low(),
                    6 => self.fetch_pattern_high(),
                    7 => {
                        self.reload_shift_registers();
                        self.increment_coarse_x();
                    }
                    _ => (),
                }
            }
            _ => (),
        }
    }

    fn update_scroll_counters(&mut self) {
        if self.dot == 256 {
            self.increment_y();
        }
        if self.dot == 257 {
            self.copy_horizontal_bits();
        }
    }

    fn rendering_enabled(&self) -> bool {
        self.mask
            .intersects(Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES)
    }

    fn sprite_height(&self) -> u16 {
        if self.control.contains(Control::TALL_SPRITES) {
            16
        } else {
            8
        }
    }

    fn fetch_nametable_byte(&mut self) {
        let address = 0x2000 | (self.vram_address & 0x0FFF);
        self.latch_nametable = self.bus.read(address);
    }

    fn fetch_attribute_byte(&mut self) {
        let v = self.vram_address;
        let address = 0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
        let byte = self.bus.read(address);
        let quadrant = ((v >> 4) & 4) | (v & 2);
        self.latch_attribute = (byte >> quadrant) & 0x03;
    }

    fn background_pattern_address(&self) -> u16 {
        let table = if self.control.contains(Control::BACKGROUND_TABLE_HIGH) {
            0x1000
        } else {
            0x0000
        };
        table | ((self.latch_nametable as u16) << 4) | ((self.vram_address >> 12) & 0x07)
    }

    fn fetch_pattern_low(&mut self) {
        self.latch_pattern_low = self.bus.read(self.background_pattern_address());
    }

    fn fetch_pattern_high(&mut self) {
        self.latch_pattern_high = self.bus.read(self.background_pattern_address() + 8);
    }

    fn shift_background(&mut self) {
        self.shift_pattern_low <<= 1;
        self.shift_pattern_high <<= 1;
        self.shift_attribute_low <<= 1;
        self.shift_attribute_high <<= 1;
    }

    fn reload_shift_registers(&mut self) {
        self.shift_pattern_low = (self.shift_pattern_low & 0xFF00) | self.latch_pattern_low as u16;
        self.shift_pattern_high =
            (self.shift_pattern_high & 0xFF00) | self.latch_pattern_high as u16;
        let attribute_low = if self.latch_attribute & 1 != 0 { 0xFF } else { 0x00 };
        let attribute_high = if self.latch_attribute & 2 != 0 { 0xFF } else { 0x00 };
        self.shift_attribute_low = (self.shift_attribute_low & 0xFF00) | attribute_low;
        self.shift_attribute_high = (self.shift_attribute_high & 0xFF00) | attribute_high;
    }

    fn increment_coarse_x(&mut self) {
        if self.vram_address & 0x001F == 31 {
            self.vram_address &= !0x001F;
            self.vram_address ^= 0x0400; // next nametable column
        } else {
            self.vram_address += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.vram_address & 0x7000 != 0x7000 {
            self.vram_address += 0x1000; // fine Y
            return;
        }
        self.vram_address &= !0x7000;
        let mut coarse_y = (self.vram_address >> 5) & 0x1F;
        if coarse_y == 29 {
            coarse_y = 0;
            self.vram_address ^= 0x0800; // next nametable row
        } else if coarse_y == 31 {
            coarse_y = 0; // attribute rows wrap without flipping
        } else {
            coarse_y += 1;
        }
        self.vram_address = (self.vram_address & !0x03E0) | (coarse_y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.vram_address = (self.vram_address & !0x041F) | (self.temp_address & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.vram_address = (self.vram_address & !0x7BE0) | (self.temp_address & 0x7BE0);
    }

    fn evaluate_sprites(&mut self) {
        let height = self.sprite_height();
        let line = self.scanline;
        self.secondary_count = 0;
        self.secondary_has_sprite_zero = false;

        let mut n = 0usize;
        while n < 64 && self.secondary_count < 8 {
            let y = self.oam[n * 4] as u16;
            if line >= y && line < y + height {
                let base = self.secondary_count as usize * 4;
                self.oam_secondary[base..base + 4].copy_from_slice(&self.oam[n * 4..n * 4 + 4]);
                if n == 0 {
                    self.secondary_has_sprite_zero = true;
                }
                self.secondary_count += 1;
            }
            n += 1;
        }

        if self.secondary_count == 8 {
            // Ninth-sprite search with the hardware's broken index stepping:
            // m advances alongside n, so the compare drifts through the
            // sprite record instead of staying on the y byte.
            let mut m = 0usize;
            while n < 64 {
                let y = self.oam[n * 4 + m] as u16;
                if line >= y && line < y + height {
                    self.sprite_overflow = true;
                    break;
                }
                n += 1;
                m = (m + 1) & 3;
            }
        }
    }

    fn fetch_sprites(&mut self) {
        let height = self.sprite_height();
        let line = self.scanline;
        self.sprite_count = self.secondary_count;

        for i in 0..self.sprite_count as usize {
            let y = self.oam_secondary[i * 4] as u16;
            let tile = self.oam_secondary[i * 4 + 1];
            let attributes = self.oam_secondary[i * 4 + 2];
            let x = self.oam_secondary[i * 4 + 3];

            let mut row = line - y;
            if attributes & MASK_FLIP_SPRITE_VERTICALLY != 0 {
                row = height - 1 - row;
            }

            let address = self.sprite_pattern_address(tile, row);
            let mut pattern_low = self.bus.read(address);
            let mut pattern_high = self.bus.read(address + 8);
            if attributes & MASK_FLIP_SPRITE_HORIZONTALLY != 0 {
                pattern_low = pattern_low.reverse_bits();
                pattern_high = pattern_high.reverse_bits();
            }

            self.sprites[i] = SpriteSlot {
                x,
                attributes,
                pattern_low,
                pattern_high,
                is_sprite_zero: i == 0 && self.secondary_has_sprite_zero,
            };
        }
    }

    fn sprite_pattern_address(&self, tile: u8, row: u16) -> u16 {
        debug_assert!(row < self.sprite_height());
        if self.control.contains(Control::TALL_SPRITES) {
            // Bit 0 of the tile index selects the pattern table; the index
            // itself rounds down to an even top/bottom pair.
            let table = ((tile & 1) as u16) << 12;
            let mut index = (tile & 0xFE) as u16;
            let mut row = row;
            if row >= 8 {
                index += 1;
                row -= 8;
            }
            table | (index << 4) | row
        } else {
            let table = if self.control.contains(Control::SPRITE_TABLE_HIGH) {
                0x1000
            } else {
                0x0000
            };
            table | ((tile as u16) << 4) | row
        }
    }

    fn render_pixel(&mut self) {
        let x = (self.dot - 1) as usize;
        let y = self.scanline as usize;

        if !self.rendering_enabled() {
            let index = self.apply_grayscale(self.bus.read(0x3F00));
            self.display
                .set_pixel(x, y, palette::color(index, self.emphasis_bits()));
            return;
        }

        let background = self.background_pixel(x);
        let sprite = self.sprite_pixel(x);

        let palette_address = match (background, sprite) {
            (0, None) => 0,
            (0, Some((pattern, attributes, _))) => {
                0x10 | ((attributes & MASK_SPRITE_PALETTE) << 2) | pattern
            }
            (background, None) => background,
            (background, Some((pattern, attributes, is_sprite_zero))) => {
                // Both layers opaque: this is the sprite-0 coincidence,
                // except at dot 255 (pixel column 254).
                if is_sprite_zero && x != 254 {
                    self.sprite_zero_hit = true;
                }
                if attributes & MASK_SPRITE_BEHIND_BACKGROUND == 0 {
                    0x10 | ((attributes & MASK_SPRITE_PALETTE) << 2) | pattern
                } else {
                    background
                }
            }
        };

        let index = self.apply_grayscale(self.bus.read(0x3F00 + palette_address as u16));
        self.display
            .set_pixel(x, y, palette::color(index, self.emphasis_bits()));
    }

    // Combined 4-bit background palette address, 0 when transparent.
    fn background_pixel(&self, x: usize) -> u8 {
        if !self.mask.contains(Mask::SHOW_BACKGROUND) {
            return 0;
        }
        if x < 8 && !self.mask.contains(Mask::SHOW_BACKGROUND_LEFT) {
            return 0;
        }

        let bit = 15 - self.fine_x as u16;
        let pattern = (((self.shift_pattern_high >> bit) & 1) << 1) | ((self.shift_pattern_low >> bit) & 1);
        if pattern == 0 {
            return 0;
        }
        let attribute =
            (((self.shift_attribute_high >> bit) & 1) << 1) | ((self.shift_attribute_low >> bit) & 1);
        ((attribute << 2) | pattern) as u8
    }

    // First opaque sprite pixel in slot order: (pattern, attributes, is sprite 0).
    fn sprite_pixel(&self, x: usize) -> Option<(u8, u8, bool)> {
        if !self.mask.contains(Mask::SHOW_SPRITES) {
            return None;
        }
        if x < 8 && !self.mask.contains(Mask::SHOW_SPRITES_LEFT) {
            return None;
        }

        for slot in self.sprites[..self.sprite_count as usize].iter() {
            let offset = x as i32 - slot.x as i32;
            if !(0..8).contains(&offset) {
                continue;
            }
            let bit = 7 - offset;
            let pattern =
                (((slot.pattern_high >> bit) & 1) << 1) | ((slot.pattern_low >> bit) & 1);
            if pattern == 0 {
                continue;
            }
            return Some((pattern, slot.attributes, slot.is_sprite_zero));
        }
        None
    }

    fn apply_grayscale(&self, index: u8) -> u8 {
        if self.mask.contains(Mask::GRAYSCALE) {
            index & 0x30
        } else {
            index
        }
    }

    fn emphasis_bits(&self) -> u8 {
        (self.mask.bits() >> 5) & 0x07
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frame_buffer(&self) -> &display::Frame {
        self.display.frame()
    }

    /// True once per completed frame; consumed by the harness before it
    /// hands the framebuffer to the video sink.
    pub fn take_frame_ready(&mut self) -> bool {
        let ready = self.frame_ready;
        self.frame_ready = false;
        ready
    }

    /// Consumes the NMI edge raised at the top of vblank.
    pub fn take_nmi_request(&mut self) -> bool {
        let requested = self.nmi_request;
        self.nmi_request = false;
        requested
    }

    pub fn vram_address(&self) -> u16 {
        self.vram_address
    }

    pub fn temp_address(&self) -> u16 {
        self.temp_address
    }

    pub fn fine_x(&self) -> u8 {
        self.fine_x
    }

    pub fn write_toggle(&self) -> bool {
        self.write_toggle
    }
}
