use crate::cli::Args;
use anyhow::{Context, Result};
use log::info;
use pctiler_core::geometry::point::AttributeSchema;
use pctiler_core::pipeline::{PipelineConfig, TilerPipeline};

pub fn build(args: Args) -> Result<()> {
    let config = PipelineConfig {
        inputs: args.inputs.clone(),
        output: args.output.clone(),
        max_depth: args.max_depth,
        max_points_per_node: args.max_points_per_node,
        sampling: args.sampling_strategy(),
        schema: AttributeSchema::ALL,
        input_format: args.input_format.map(Into::into),
        aabb: args.aabb.clone(),
        worker_count: args.worker_count(),
        max_depth_per_file: args.max_depth_per_file,
        root_error: args.root_error,
        up_axis: args.up_axis.into(),
        naming: args.format.naming_convention(),
        extension: args.format.extension(),
        persist_to_disk: true,
    };

    let pipeline = TilerPipeline::new(config);
    let cancel = pipeline.cancellation_flag();
    ctrlc::set_handler(move || {
        log::warn!("cancellation requested, finishing in-flight work before stopping");
        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;

    let written = pipeline.run().context("tiling run failed")?;
    info!("wrote {} tileset descriptor(s) to {}", written.len(), args.output.display());
    Ok(())
}
