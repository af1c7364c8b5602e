//! An ASTC encoder and decoder for 2D and 3D LDR/HDR texture blocks.
//!
//! The codec works on raw `f32` RGBA texel data and produces the standard
//! 16-byte ASTC block stream; container formats (KTX, DDS) and file I/O
//! are out of scope. A [`Context`] owns the precomputed tables for one
//! block footprint and is immutable once built, so it can be shared freely
//! across threads.
//!
//! ```
//! use astc::{Config, Context, ImageView, ImageViewMut, Preset, Profile, Swizzle};
//!
//! let pixels = vec![0.5f32; 8 * 8 * 4];
//! let image = ImageView::new(&pixels, 8, 8, 1).unwrap();
//!
//! let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Fast).unwrap();
//! let ctx = Context::new(config).unwrap();
//!
//! let mut compressed = vec![0u8; ctx.compressed_size(8, 8, 1)];
//! ctx.compress_image(&image, Swizzle::RGBA, &mut compressed, 1).unwrap();
//!
//! let mut decoded = vec![0.0f32; 8 * 8 * 4];
//! let mut out = ImageViewMut::new(&mut decoded, 8, 8, 1).unwrap();
//! ctx.decompress_image(&compressed, &mut out, Swizzle::RGBA, 1).unwrap();
//! ```

#![forbid(unsafe_code)]

mod averages;
mod bise;
mod block;
mod block_size;
mod color;
mod compress;
mod config;
mod decimation;
mod decompress;
mod dispatch;
mod error;
mod format_select;
mod ideal;
mod image;
mod mathutil;
mod partition;
mod partition_search;
mod physical;
mod quant;
mod symbolic;
mod weight_quant;

use std::sync::{Mutex, OnceLock};

use averages::InputAverages;
use block::{
    compute_error_weights, expand_deblock_weights, BlockInputModifiers, ImageBlock,
};
use block_size::BlockSizeDescriptor;
use compress::CompressionWorkingBuffers;
use dispatch::ParallelManager;

pub use config::{
    is_legal_2d_block_size, is_legal_3d_block_size, Config, Flags, Preset, Profile, Swizzle,
    SwizzleComponent,
};
pub use error::Error;
pub use image::{ImageView, ImageViewMut};
pub use quant::QuantMethod;

/// Number of blocks handed to a worker per dispatch ticket.
const TASK_GRANULE: u32 = 8;

/// A compression/decompression context for one configuration.
///
/// Construction builds the block size descriptor: every legal block mode,
/// the decimation tables they reference, and all partition tables. That
/// work is done once; afterwards the context is read-only and can be used
/// from any number of threads.
pub struct Context {
    config: Config,
    bsd: Box<BlockSizeDescriptor>,
}

impl Context {
    /// Validates `config` and builds the context.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        // All legal modes are kept so the context can decode foreign data;
        // the cutoff only controls which modes the search visits.
        let bsd = BlockSizeDescriptor::new(
            config.block_x,
            config.block_y,
            config.block_z,
            false,
            config.tune_block_mode_limit,
        );
        Ok(Context { config, bsd })
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The number of blocks needed for an image of the given size.
    pub fn block_count(&self, width: u32, height: u32, depth: u32) -> usize {
        let bx = width.div_ceil(self.config.block_x) as usize;
        let by = height.div_ceil(self.config.block_y) as usize;
        let bz = depth.div_ceil(self.config.block_z) as usize;
        bx * by * bz
    }

    /// The compressed size in bytes of an image of the given size.
    pub fn compressed_size(&self, width: u32, height: u32, depth: u32) -> usize {
        self.block_count(width, height, depth) * 16
    }

    fn block_coords(&self, index: usize, width: u32, height: u32) -> (u32, u32, u32) {
        let bx = width.div_ceil(self.config.block_x) as usize;
        let by = height.div_ceil(self.config.block_y) as usize;
        let x = (index % bx) as u32;
        let y = ((index / bx) % by) as u32;
        let z = (index / (bx * by)) as u32;
        (
            x * self.config.block_x,
            y * self.config.block_y,
            z * self.config.block_z,
        )
    }

    fn needs_input_averages(&self) -> bool {
        self.config.flags.contains(Flags::USE_PERCEPTUAL)
            || self.config.flags.contains(Flags::USE_ALPHA_WEIGHT)
    }

    /// Compresses `image` into `out` using `thread_count` worker threads.
    ///
    /// The output is byte-identical for every thread count: threads only
    /// change which worker handles which block. NaN texels are replaced by
    /// zero before encoding; this is not an error.
    pub fn compress_image(
        &self,
        image: &ImageView,
        swizzle: Swizzle,
        out: &mut [u8],
        thread_count: u32,
    ) -> Result<(), Error> {
        swizzle.validate(false)?;

        let block_count = self.block_count(image.width(), image.height(), image.depth());
        let needed = block_count * 16;
        if out.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                provided: out.len(),
            });
        }

        let thread_count = thread_count.max(1);
        let deblock = expand_deblock_weights(&self.config, &self.bsd);

        let averages_slot: OnceLock<Option<InputAverages>> = OnceLock::new();
        let manage_avg_var = ParallelManager::new();
        let manage_compress = ParallelManager::new();
        let out_lock = Mutex::new(out);

        std::thread::scope(|scope| {
            for _ in 0..thread_count {
                let averages_slot = &averages_slot;
                let manage_avg_var = &manage_avg_var;
                let manage_compress = &manage_compress;
                let out_lock = &out_lock;
                let deblock = &deblock;

                scope.spawn(move || {
                    // Stage 1: input averages, computed once by whichever
                    // thread arrives first; the init lock doubles as the
                    // stage barrier since the stage has no tickets.
                    manage_avg_var.init(|| {
                        let averages = self.needs_input_averages().then(|| {
                            averages::compute_averages_and_variances(
                                image,
                                self.config.v_rgba_radius.max(1),
                                self.config.a_scale_radius.max(1),
                                swizzle,
                            )
                        });
                        averages_slot.set(averages).ok().expect("init ran twice");
                        0
                    });
                    manage_avg_var.wait();

                    // Stage 2: block compression.
                    manage_compress.init(|| block_count as u32);

                    let averages = averages_slot.get().expect("averages stage incomplete");
                    let mut blk = ImageBlock::new();
                    let mut buffers = CompressionWorkingBuffers::new();
                    let mut block_averages = Vec::new();
                    let mut block_variances = Vec::new();
                    let mut block_alpha_averages = Vec::new();
                    let mut chunk = Vec::with_capacity(TASK_GRANULE as usize * 16);

                    loop {
                        let (base, count) = manage_compress.get_task_assignment(TASK_GRANULE);
                        if count == 0 {
                            break;
                        }

                        chunk.clear();
                        for index in base..base + count {
                            let (xpos, ypos, zpos) =
                                self.block_coords(index as usize, image.width(), image.height());
                            image::fetch_image_block(
                                self.config.profile,
                                image,
                                &self.bsd,
                                &mut blk,
                                xpos,
                                ypos,
                                zpos,
                                swizzle,
                            );

                            let modifiers = match averages {
                                Some(avg) => {
                                    avg.gather_block(
                                        xpos,
                                        ypos,
                                        zpos,
                                        self.config.block_x,
                                        self.config.block_y,
                                        self.config.block_z,
                                        &mut block_averages,
                                        &mut block_variances,
                                        &mut block_alpha_averages,
                                    );
                                    BlockInputModifiers {
                                        averages: Some(&block_averages),
                                        variances: Some(&block_variances),
                                        alpha_averages: Some(&block_alpha_averages),
                                    }
                                }
                                None => BlockInputModifiers::NONE,
                            };

                            let ewb =
                                compute_error_weights(&self.config, &blk, deblock, &modifiers);
                            let scb = compress::compress_block(
                                &self.config,
                                &self.bsd,
                                &blk,
                                &ewb,
                                &mut buffers,
                            );
                            chunk.extend_from_slice(&physical::symbolic_to_physical(
                                &self.bsd, &scb,
                            ));
                        }

                        {
                            let mut out = out_lock.lock().unwrap();
                            let start = base as usize * 16;
                            out[start..start + chunk.len()].copy_from_slice(&chunk);
                        }
                        manage_compress.complete_task_assignment(count);
                    }
                    manage_compress.wait();
                });
            }
        });

        Ok(())
    }

    /// Decompresses `data` into `image` using `thread_count` worker
    /// threads.
    ///
    /// Malformed blocks decode to the profile's error color; they never
    /// fail the call.
    pub fn decompress_image(
        &self,
        data: &[u8],
        image: &mut ImageViewMut,
        swizzle: Swizzle,
        thread_count: u32,
    ) -> Result<(), Error> {
        swizzle.validate(true)?;

        let block_count = self.block_count(image.width(), image.height(), image.depth());
        let needed = block_count * 16;
        if data.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                provided: data.len(),
            });
        }

        let width = image.width();
        let height = image.height();

        let thread_count = thread_count.max(1);
        let manage_decompress = ParallelManager::new();
        let image_lock = Mutex::new(image);

        std::thread::scope(|scope| {
            for _ in 0..thread_count {
                let manage_decompress = &manage_decompress;
                let image_lock = &image_lock;

                scope.spawn(move || {
                    manage_decompress.init(|| block_count as u32);
                    let mut blk = ImageBlock::new();

                    loop {
                        let (base, count) = manage_decompress.get_task_assignment(TASK_GRANULE);
                        if count == 0 {
                            break;
                        }

                        for index in base..base + count {
                            let start = index as usize * 16;
                            let mut bytes = [0u8; 16];
                            bytes.copy_from_slice(&data[start..start + 16]);

                            let scb = physical::physical_to_symbolic(&self.bsd, bytes);
                            decompress::decompress_symbolic_block(
                                self.config.profile,
                                &self.bsd,
                                &scb,
                                &mut blk,
                            );

                            let (xpos, ypos, zpos) =
                                self.block_coords(index as usize, width, height);
                            let mut image = image_lock.lock().unwrap();
                            image::write_image_block(
                                &mut **image, &blk, &self.bsd, xpos, ypos, zpos, swizzle,
                            );
                        }
                        manage_decompress.complete_task_assignment(count);
                    }
                    manage_decompress.wait();
                });
            }
        });

        Ok(())
    }
}
