//! Assembling the layer stack from configuration.

use std::sync::Arc;

use shedutils::CommandRunner;

use crate::{
    config::ShedConfig,
    fetcher::{
        CompositeFetcher, ImageRetainer, Local, LocalLayerIdProvider, RegistryDialer, Remote,
        RepositoryFetcher, Retryable,
    },
    layercake::{
        init_graph_db, Cake, GraphDriver, LayerIndex, LayerStore, NamespacingCake, OvenCleaner,
        QuotaedDriver, RetainSet,
    },
    quota::{BackingStore, Loop, QuotaLayer},
    rootfs::{CakeOrdinator, ChownNamespacer, ContainerLayerCreator, Namespacer, SimpleVolumeCreator},
    ShedResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds an ordinator over `driver` as described by `config`.
///
/// The stack, from the outside in, is the ordinator, an [`OvenCleaner`] consulting a shared
/// [`RetainSet`], a [`NamespacingCake`], and a [`LayerStore`] over `driver` with quota support.
/// The layer creator sits below the cleaner, on the [`NamespacingCake`]. The configured
/// persistent images are retained before returning.
pub async fn build_ordinator<D>(
    config: &ShedConfig,
    driver: D,
    runner: Arc<dyn CommandRunner>,
) -> ShedResult<CakeOrdinator>
where
    D: GraphDriver + 'static,
{
    config.validate()?;
    tokio::fs::create_dir_all(config.get_graph_root()).await?;

    let quota_layer = Arc::new(QuotaLayer::new(
        Arc::new(BackingStore::new(config.backing_store_dir(), runner.clone())),
        Arc::new(Loop::new(
            runner.clone(),
            config.get_unmount_retry().retrier(),
        )),
    ));
    let driver: Arc<dyn GraphDriver> = Arc::new(QuotaedDriver::new(
        driver,
        config.get_graph_root(),
        quota_layer,
        runner.clone(),
    ));

    let pool = init_graph_db(config.graph_db_path()).await?;
    let store: Arc<dyn Cake> = Arc::new(LayerStore::new(driver, pool.clone()));

    let namespacer = Arc::new(ChownNamespacer::new(
        config.get_uid_mappings().clone(),
        config.get_gid_mappings().clone(),
    ));
    let namespacing: Arc<dyn Cake> = Arc::new(NamespacingCake::new(
        store,
        LayerIndex::new(pool),
        runner.clone(),
        namespacer.clone(),
        *config.get_namespaced_layer_quota(),
    ));

    let retain_set = Arc::new(RetainSet::new());
    let cake: Arc<dyn Cake> = Arc::new(OvenCleaner::new(
        namespacing.clone(),
        retain_set.clone(),
        *config.get_enable_image_cleanup(),
    ));

    let id_provider = Arc::new(LocalLayerIdProvider);
    let remote: Arc<dyn RepositoryFetcher> = Arc::new(Retryable::new(Remote::new(
        config.get_default_registry_host().clone(),
        cake.clone(),
        Arc::new(RegistryDialer::new()),
    )));
    let local: Arc<dyn RepositoryFetcher> = Arc::new(Local::new(
        cake.clone(),
        config.get_default_rootfs().clone(),
        id_provider.clone(),
    ));
    let fetcher = Arc::new(CompositeFetcher::new(remote.clone(), local));

    // Rolling back a container layer must not cascade into its image.
    let layer_creator = Arc::new(ContainerLayerCreator::new(
        namespacing,
        Arc::new(SimpleVolumeCreator),
        namespacer.clone(),
    ));

    ImageRetainer::new(
        retain_set.clone(),
        id_provider,
        remote,
        namespacer.cache_key(),
    )
    .retain(config.get_persistent_images())
    .await;

    tracing::info!(
        graph_root = %config.get_graph_root().display(),
        driver = cake.driver_name(),
        retained = retain_set.len(),
        "layer stack ready"
    );

    Ok(CakeOrdinator::new(cake, fetcher, layer_creator, retain_set))
}
