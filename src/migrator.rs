use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_membership_plans_table::Migration),
            Box::new(m20240301_000002_create_payment_orders_table::Migration),
            Box::new(m20240301_000003_create_memberships_table::Migration),
            Box::new(m20240301_000004_create_renewal_subscriptions_table::Migration),
            Box::new(m20240301_000005_create_coupons_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_membership_plans_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_membership_plans_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MembershipPlans::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MembershipPlans::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(MembershipPlans::Name).string().not_null())
                        .col(ColumnDef::new(MembershipPlans::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(MembershipPlans::DurationDays)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MembershipPlans::Level).integer().not_null())
                        .col(
                            ColumnDef::new(MembershipPlans::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MembershipPlans::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum MembershipPlans {
        Table,
        Id,
        Code,
        Name,
        Price,
        DurationDays,
        Level,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_payment_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_payment_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentOrders::UserId).uuid().not_null())
                        .col(ColumnDef::new(PaymentOrders::PlanId).uuid().not_null())
                        .col(ColumnDef::new(PaymentOrders::Provider).string().not_null())
                        .col(
                            ColumnDef::new(PaymentOrders::OriginalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::FinalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentOrders::CouponId).uuid().null())
                        .col(ColumnDef::new(PaymentOrders::Status).string().not_null())
                        .col(
                            ColumnDef::new(PaymentOrders::ProviderReference)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::RedirectPayload)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::RenewalSubscriptionId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::RefundedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_orders_user_created")
                        .table(PaymentOrders::Table)
                        .col(PaymentOrders::UserId)
                        .col(PaymentOrders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_orders_provider_reference")
                        .table(PaymentOrders::Table)
                        .col(PaymentOrders::ProviderReference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentOrders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum PaymentOrders {
        Table,
        Id,
        UserId,
        PlanId,
        Provider,
        OriginalAmount,
        DiscountAmount,
        FinalAmount,
        CouponId,
        Status,
        ProviderReference,
        RedirectPayload,
        RenewalSubscriptionId,
        PaidAt,
        RefundedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_memberships_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_memberships_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Memberships::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Memberships::UserId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Memberships::PlanId).uuid().not_null())
                        .col(
                            ColumnDef::new(Memberships::StartDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Memberships::ExpiryDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Memberships::AutoRenewal)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Memberships::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(ColumnDef::new(Memberships::PriorPlanId).uuid().null())
                        .col(
                            ColumnDef::new(Memberships::PriorExpiry)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Memberships::LastOrderId).uuid().null())
                        .col(
                            ColumnDef::new(Memberships::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Memberships::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Memberships::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Memberships {
        Table,
        UserId,
        PlanId,
        StartDate,
        ExpiryDate,
        AutoRenewal,
        Status,
        PriorPlanId,
        PriorExpiry,
        LastOrderId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_renewal_subscriptions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_renewal_subscriptions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RenewalSubscriptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RenewalSubscriptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::UserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::PlanId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::Provider)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::PaymentTokenEnc)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::NextRenewalDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::LastRenewalDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::LastAttemptAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::LastOrderId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::ReminderSentAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RenewalSubscriptions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_renewal_subscriptions_due")
                        .table(RenewalSubscriptions::Table)
                        .col(RenewalSubscriptions::Status)
                        .col(RenewalSubscriptions::NextRenewalDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RenewalSubscriptions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum RenewalSubscriptions {
        Table,
        Id,
        UserId,
        PlanId,
        Provider,
        PaymentTokenEnc,
        Status,
        NextRenewalDate,
        LastRenewalDate,
        LastAttemptAt,
        LastOrderId,
        ReminderSentAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000005_create_coupons_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_coupons_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Coupons::Kind).string().not_null())
                        .col(ColumnDef::new(Coupons::Value).decimal().not_null())
                        .col(ColumnDef::new(Coupons::MinOrderAmount).decimal().null())
                        .col(ColumnDef::new(Coupons::ApplicablePlanId).uuid().null())
                        .col(
                            ColumnDef::new(Coupons::ValidFrom)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidTo)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::MaxUsesTotal)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::MaxUsesPerUser)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponRedemptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponRedemptions::OrderId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponRedemptions::CouponId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponRedemptions::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(CouponRedemptions::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponRedemptions::DiscountAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponRedemptions::RedeemedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_redemptions_coupon_user")
                        .table(CouponRedemptions::Table)
                        .col(CouponRedemptions::CouponId)
                        .col(CouponRedemptions::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponRedemptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Coupons {
        Table,
        Id,
        Code,
        Kind,
        Value,
        MinOrderAmount,
        ApplicablePlanId,
        ValidFrom,
        ValidTo,
        MaxUsesTotal,
        MaxUsesPerUser,
        UsedCount,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    pub enum CouponRedemptions {
        Table,
        OrderId,
        CouponId,
        UserId,
        Amount,
        DiscountAmount,
        RedeemedAt,
    }
}
