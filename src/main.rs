use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tfserving_vision::render::{self, pixel_rect};
use tfserving_vision::{
    DetectionAdapter, Image, ModelKind, Prediction, Result, RgbPixels, TensorflowServing,
};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tfserving-vision",
    about = "Run DeepLab segmentation or SSD detection on an image through TensorFlow Serving"
)]
struct Opts {
    /// Image file to send (PNG or JPEG)
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// TensorFlow Serving gRPC address
    #[structopt(long = "serving-address", default_value = "localhost:8500")]
    serving_address: String,
    /// Model to run: deeplab or ssd
    #[structopt(short = "m", long = "model", default_value = "deeplab")]
    model: String,
    /// Serve under a different model name than the profile's
    #[structopt(long = "model-name")]
    model_name: Option<String>,
    #[structopt(long = "model-version")]
    model_version: Option<i64>,
    /// Per-request deadline in seconds
    #[structopt(long = "timeout-secs")]
    timeout_secs: Option<u64>,
    /// Directory the result image and JSON dump are written to
    #[structopt(long = "output-dir", parse(from_os_str), default_value = ".")]
    output_dir: PathBuf,
    /// Only visit the first `num_detections` SSD output slots
    #[structopt(long = "bound-by-num-detections")]
    bound_by_num_detections: bool,
}

fn artifact_names(model: ModelKind) -> (&'static str, &'static str) {
    match model {
        ModelKind::Segmentation => ("segmap.png", "segmap.json"),
        ModelKind::Detection => ("ssd_result.png", "ssd_response.json"),
    }
}

async fn run(opts: Opts) -> Result<()> {
    // Fail on a bad selector before touching the image or the network.
    let model: ModelKind = opts.model.parse()?;

    let img = opts.image.to_image()?;
    let pixels = RgbPixels::from_image(&img);
    info!(
        "image {}: h = {}, w = {}",
        opts.image.display(),
        pixels.height(),
        pixels.width()
    );

    let mut builder = model.request_builder(&pixels)?;
    if let Some(version) = opts.model_version {
        builder.version(version);
    }
    let mut request = builder.build();
    if let Some(name) = opts.model_name {
        request.model_name = name;
    }

    let mut client_builder = TensorflowServing::new();
    client_builder.address(&opts.serving_address)?;
    if let Some(secs) = opts.timeout_secs {
        client_builder.timeout(Duration::from_secs(secs));
    }
    let mut serving = client_builder.build().await?;

    let response = serving.predict(request).await?;

    let (image_name, json_name) = artifact_names(model);
    let json_path = opts.output_dir.join(json_name);
    render::write_json(&json_path, &response)?;
    info!("wrote {}", json_path.display());

    let detection = DetectionAdapter {
        bound_by_num_detections: opts.bound_by_num_detections,
    };
    let image_path = opts.output_dir.join(image_name);
    match model.adapt_with(&response, detection)? {
        Prediction::Segmentation(result) => {
            info!("result shape: h = {}, w = {}", result.height, result.width);
            render::render_segmentation(&result).save(&image_path)?;
        }
        Prediction::Detection(result) => {
            info!(
                "num_detections = {:.2}, total slots: {}",
                result.num_detections, result.total_slots
            );
            log_detections(&result, pixels.width(), pixels.height());
            render::render_detections(&img, &result).save(&image_path)?;
        }
    }
    info!("wrote {}", image_path.display());

    Ok(())
}

fn log_detections(result: &tfserving_vision::DetectionResult, width: u32, height: u32) {
    for d in &result.detections {
        match pixel_rect(&d.bbox, width, height) {
            Some(rect) => info!(
                "i = {}, score = {:.3}, class = {}, rect = ({}, {})-({}, {})",
                d.slot,
                d.score,
                d.class_id,
                rect.left(),
                rect.top(),
                rect.right(),
                rect.bottom()
            ),
            None => info!(
                "i = {}, score = {:.3}, class = {}, empty box",
                d.slot, d.score, d.class_id
            ),
        }
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let opts = Opts::from_args();

    if !opts.output_dir.is_dir() {
        error!("output directory {} does not exist", opts.output_dir.display());
        std::process::exit(1);
    }

    if let Err(e) = run(opts).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
