use clap::Parser;
use nalgebra::Matrix4;
use reslice::{Image, ImageInfo, InterpolationMode, Reslice, SlabMode};

#[derive(Parser, Default, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Edge length of the synthetic input volume
    #[arg(short, default_value_t = 64usize)]
    size: usize,

    /// Rotation about the z axis, in degrees
    #[arg(short, default_value_t = 30.0f64)]
    angle: f64,

    /// Order
    #[arg(short = 'n', default_value_t = 1i8)]
    order: i8,

    /// Composite this many slices into each output slice
    #[arg(short = 's', default_value_t = 1usize)]
    slab: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let n = args.size as i64;
    let info = ImageInfo::new([0, n - 1, 0, n - 1, 0, n - 1]);
    let center = 0.5 * (n - 1) as f64;
    // a bright ball in the middle of the volume
    let input = Image::from_fn(info, 1, |x, y, z, _| {
        let r = ((x as f64 - center).powi(2)
            + (y as f64 - center).powi(2)
            + (z as f64 - center).powi(2))
        .sqrt();
        (4000.0 / (1.0 + r)) as u16
    })
    .expect("failed to allocate the input volume");

    let mode = match args.order {
        0 => InterpolationMode::Nearest,
        1 => InterpolationMode::Linear,
        3 => InterpolationMode::Cubic,
        _ => panic!("invalid order argument"),
    };

    let c = args.angle.to_radians().cos();
    let s = args.angle.to_radians().sin();
    #[rustfmt::skip]
    let axes = Matrix4::from_row_slice(&[
        c,  -s,  0.0, 0.0,
        s,   c,  0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);

    let mut filter = Reslice::new();
    filter.set_interpolation_mode(mode);
    filter.set_reslice_axes(axes);
    filter.set_auto_crop_output(true);
    if args.slab > 1 {
        filter
            .set_slab_number_of_slices(args.slab)
            .expect("invalid slab size");
        filter.set_slab_mode(SlabMode::Max);
    }

    let out = match filter.execute(&input, None) {
        Ok(out) => out,
        Err(err) => {
            println!("failed to reslice: {err}");
            return;
        }
    };

    let e = out.image.info().extent;
    let values = out.image.scalars::<u16>().expect("unexpected output kind");
    let max = values.iter().copied().max().unwrap_or(0);
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64;
    println!(
        "resliced {0}^3 -> [{1}, {2}] x [{3}, {4}] x [{5}, {6}]",
        args.size, e[0], e[1], e[2], e[3], e[4], e[5]
    );
    println!("max {max}, mean {mean:.2}");
}
